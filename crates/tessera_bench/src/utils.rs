//! Benchmark utilities.

use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tessera_core::{Config, ManualScheduler, ObjectSchemaDef, PropertyDef, Realm, Registry, Value};

/// Generate random bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a random alphanumeric name.
pub fn random_name(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Schema used by every realm benchmark: a `Person` keyed by `id` with an
/// indexed `age`.
pub fn bench_schema() -> Vec<ObjectSchemaDef> {
    vec![ObjectSchemaDef::new("Person")
        .property("id", "int")
        .property("name", "string")
        .property("age", PropertyDef::new("int").indexed())
        .property("score", "double")
        .property("tags", "string[]")
        .primary_key("id")]
}

/// An unmanaged `Person` literal with random name and score.
pub fn person(id: i64) -> Value {
    let mut rng = rand::thread_rng();
    Value::object([
        ("id", Value::from(id)),
        ("name", Value::from(random_name(12))),
        ("age", Value::from(rng.gen_range(0..100i64))),
        ("score", Value::from(rng.gen::<f64>())),
        ("tags", Value::from(vec!["a", "b"])),
    ])
}

/// Generate `count` people with sequential ids.
pub fn generate_people(count: usize) -> Vec<Value> {
    (0..count as i64).map(person).collect()
}

/// Opens a fresh in-memory realm. Change delivery is left to a manual
/// scheduler that benchmarks may drain explicitly.
pub fn open_memory_realm(name: &str) -> (Registry, Realm, Arc<ManualScheduler>) {
    let registry = Registry::new();
    let scheduler = Arc::new(ManualScheduler::new());
    let config = Config::in_memory(name)
        .schema(bench_schema())
        .scheduler(scheduler.clone());
    let realm = registry.open(config).expect("open in-memory realm");
    (registry, realm, scheduler)
}

/// Opens a fresh realm populated with `count` people.
pub fn populated_realm(name: &str, count: usize) -> (Registry, Realm, Arc<ManualScheduler>) {
    let (registry, realm, scheduler) = open_memory_realm(name);
    let people = generate_people(count);
    realm
        .write(|| {
            for p in people {
                realm.create("Person", p)?;
            }
            Ok(())
        })
        .expect("populate realm");
    (registry, realm, scheduler)
}
