//! The host language's standard library packages.
//!
//! Stdlib packages ship with the runtime: the resolver treats them as fixed,
//! versionless entries and the installer never materializes them.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::core::{PackageName, Uuid};

const STDLIBS: &[(&str, &str)] = &[
    ("Dates", "ade2ca70-3891-5945-98fb-dc099432e06a"),
    ("LinearAlgebra", "37e2e46d-f89d-539d-b4ee-838fcccc9c8e"),
    ("Logging", "56ddb016-857b-54e1-b83d-db4d58db5568"),
    ("Markdown", "d6f4376e-aef5-505a-96c1-9c027394607a"),
    ("Printf", "de0858da-6303-5e67-8744-51eddeeeb8d7"),
    ("Random", "9a3f8284-a2c9-5f02-9a11-845980a1fd5c"),
    ("SHA", "ea8e919c-243c-51af-8825-aaa63cd721ce"),
    ("Serialization", "9e88b42a-f829-5b0c-bbe9-9e923198166b"),
    ("Statistics", "10745b16-79ce-11e8-11f9-7d13ad32a3b2"),
    ("Test", "8dfed614-e22c-5e08-85e1-65c5234f0b40"),
    ("UUIDs", "cf7118a7-6976-5b1a-9a39-7adc72f591a4"),
    ("Unicode", "4ec0a83e-493e-50e2-b9ac-8f72acf5a8f5"),
];

fn table() -> &'static HashMap<Uuid, PackageName> {
    static TABLE: OnceLock<HashMap<Uuid, PackageName>> = OnceLock::new();
    TABLE.get_or_init(|| {
        STDLIBS
            .iter()
            .map(|(name, uuid)| {
                (
                    Uuid::parse(uuid).expect("stdlib table is well-formed"),
                    PackageName::new(name),
                )
            })
            .collect()
    })
}

pub fn is_stdlib(uuid: Uuid) -> bool {
    table().contains_key(&uuid)
}

pub fn stdlib_name(uuid: Uuid) -> Option<&'static PackageName> {
    table().get(&uuid)
}

pub fn stdlib_uuid(name: &PackageName) -> Option<Uuid> {
    table()
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(uuid, _)| *uuid)
}
