use console::Style;
use serde::{Serialize, Serializer};

#[cfg(doc)]
use super::Ui;

const JSON_SKIP_MESSAGE: &str = "UI_INTERNAL_SKIP";

/// A typed object that can be either printed as a human-readable message or serialized as JSON.
pub trait Message {
    /// Return textual representation of this message.
    ///
    /// Default implementation returns empty string, making [`Ui`] skip printing this message.
    fn text(self) -> String
    where
        Self: Sized,
    {
        String::new()
    }

    #[doc(hidden)]
    fn print_text(self)
    where
        Self: Sized,
    {
        let text = self.text();
        if !text.is_empty() {
            println!("{text}");
        }
    }

    /// Serialize this structured message to a serializer which is routed to [`Ui`] output stream.
    ///
    /// Default implementation does not serialize anything, making [`Ui`] skip printing
    /// this message.
    fn structured<S: Serializer>(self, ser: S) -> Result<S::Ok, S::Error>
    where
        Self: Sized,
    {
        Self::skip_structured(ser)
    }

    #[doc(hidden)]
    fn skip_structured<S: Serializer>(_ser: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom(JSON_SKIP_MESSAGE))
    }

    #[doc(hidden)]
    fn print_json(self)
    where
        Self: Sized,
    {
        let mut buf = Vec::with_capacity(128);
        let mut serializer = serde_json::Serializer::new(&mut buf);
        match self.structured(&mut serializer) {
            Ok(_) => {
                let string = String::from_utf8(buf).expect("JSON is always UTF-8 encoded");
                println!("{string}");
            }
            Err(err) => {
                if err.to_string() != JSON_SKIP_MESSAGE {
                    panic!("JSON serialization of UI message must not fail: {err}")
                }
            }
        }
    }
}

impl Message for &str {
    fn text(self) -> String {
        self.to_string()
    }
}

impl Message for String {
    fn text(self) -> String {
        self
    }
}

/// A message with a distinguishing type tag, such as `warn` or `error`.
#[derive(Serialize)]
pub struct TypedMessage<'a> {
    r#type: &'a str,
    #[serde(skip)]
    color: &'a str,
    message: &'a str,
}

impl<'a> TypedMessage<'a> {
    pub fn styled(ty: &'a str, color: &'a str, message: &'a str) -> Self {
        Self {
            r#type: ty,
            color,
            message,
        }
    }
}

impl Message for TypedMessage<'_> {
    fn text(self) -> String {
        format!(
            "{}: {}",
            Style::from_dotted_str(self.color).apply_to(self.r#type),
            self.message
        )
    }

    fn structured<S: Serializer>(self, ser: S) -> Result<S::Ok, S::Error> {
        self.serialize(ser)
    }
}
