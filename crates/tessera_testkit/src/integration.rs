//! Cross-module integration test helpers.
//!
//! [`IntegrationHarness`] mirrors every write into a plain map and checks
//! the store (objects, primary key lookups and queries) against it.

use std::collections::BTreeMap;

use tessera_core::{ObjectSchemaDef, UpdateMode, Value};

use crate::fixtures::{people_schema, person, TestRealm};

/// A test harness tracking `Person` rows for verification.
pub struct IntegrationHarness {
    /// The realm under test.
    pub test: TestRealm,
    people: BTreeMap<i64, (String, i64)>,
}

impl IntegrationHarness {
    /// Creates a harness over an in-memory realm with [`people_schema`].
    pub fn new() -> Self {
        Self::over(TestRealm::memory(people_schema()))
    }

    /// Creates a harness over an existing fixture, which must use
    /// [`people_schema`].
    pub fn over(test: TestRealm) -> Self {
        Self {
            test,
            people: BTreeMap::new(),
        }
    }

    /// Creates or updates a person and tracks it.
    pub fn put(&mut self, id: i64, name: &str, age: i64) {
        let realm = &self.test.realm;
        realm
            .write(|| realm.create_with_mode("Person", person(id, name, age), UpdateMode::Modified))
            .expect("Failed to put person");
        self.people.insert(id, (name.to_string(), age));
    }

    /// Deletes a person by primary key and updates tracking.
    pub fn delete(&mut self, id: i64) {
        let realm = &self.test.realm;
        realm
            .write(|| {
                if let Some(p) = realm.object_for_primary_key("Person", id)? {
                    realm.delete(&p)?;
                }
                Ok(())
            })
            .expect("Failed to delete person");
        self.people.remove(&id);
    }

    /// Verifies every tracked person is stored with the tracked values and
    /// that nothing else is.
    pub fn verify_all(&self) {
        let realm = &self.test.realm;
        let all = realm.objects("Person").expect("Failed to query people");
        assert_eq!(all.len().unwrap(), self.people.len(), "Person count mismatch");
        for (id, (name, age)) in &self.people {
            let p = realm
                .object_for_primary_key("Person", *id)
                .unwrap()
                .unwrap_or_else(|| panic!("Person {id} missing"));
            assert_eq!(p.get("name").unwrap(), Value::from(name.as_str()), "name of {id}");
            assert_eq!(p.get("age").unwrap(), Value::Int(*age), "age of {id}");
        }
    }

    /// Verifies `age >= threshold` selects exactly the tracked matches, in
    /// ascending id order when sorted by id.
    pub fn verify_age_query(&self, threshold: i64) {
        let matches = self
            .test
            .realm
            .objects("Person")
            .unwrap()
            .filtered("age >= $0", &[threshold.into()])
            .unwrap()
            .sorted("id", false)
            .unwrap();
        let expected: Vec<i64> = self
            .people
            .iter()
            .filter(|(_, (_, age))| *age >= threshold)
            .map(|(id, _)| *id)
            .collect();
        let actual: Vec<i64> = matches
            .objects()
            .unwrap()
            .iter()
            .map(|p| p.get("id").unwrap().as_int().unwrap())
            .collect();
        assert_eq!(actual, expected, "age >= {threshold}");
    }

    /// Returns the count of tracked people.
    pub fn tracked_count(&self) -> usize {
        self.people.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A schema exercising embedded objects, sets and mixed values.
pub fn catalog_schema() -> Vec<ObjectSchemaDef> {
    vec![
        ObjectSchemaDef::new("Product")
            .primary_key("sku")
            .property("sku", "string")
            .property("price", "double")
            .property("tags", "string<>")
            .property("dimensions", "Dimensions")
            .property("extra", "mixed"),
        ObjectSchemaDef::new("Dimensions")
            .embedded()
            .property("width", "int")
            .property("height", "int"),
    ]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use proptest::prelude::*;
    use tessera_core::{ChangeSet, ErrorKind, ObjectChangeSet};

    use super::*;
    use crate::generators::people_strategy;

    #[test]
    fn harness_tracks_puts_updates_and_deletes() {
        let mut h = IntegrationHarness::new();
        h.put(1, "Ann", 30);
        h.put(2, "Bob", 12);
        h.put(1, "Ann", 31);
        h.delete(2);
        h.put(3, "Cid", 45);
        assert_eq!(h.tracked_count(), 2);
        h.verify_all();
        h.verify_age_query(40);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn queries_agree_with_model(people in people_strategy(30), threshold in 0i64..100) {
            let mut h = IntegrationHarness::new();
            for (id, name, age) in &people {
                h.put(*id, name, *age);
            }
            h.verify_all();
            h.verify_age_query(threshold);
        }
    }

    #[test]
    fn links_backlinks_and_cascading_queries() {
        let t = TestRealm::memory(people_schema());
        t.write(|| {
            let ann = t.create("Person", person(1, "Ann", 30))?;
            let bob = t.create("Person", person(2, "Bob", 12))?;
            ann.set("partner", &bob)?;
            ann.list("friends")?.push([&bob])?;
            t.create("Dog", Value::object([("name", Value::from("Rex")), ("owner", (&ann).into())]))?;
            t.create("Dog", Value::object([("name", Value::from("Fido")), ("owner", (&ann).into())]))?;
            Ok(())
        })
        .unwrap();

        let ann = t.object_for_primary_key("Person", 1).unwrap().unwrap();
        assert_eq!(ann.linking_objects("dogs").unwrap().len().unwrap(), 2);
        let by_partner = t
            .objects("Person")
            .unwrap()
            .filtered("partner.name == $0", &["Bob".into()])
            .unwrap();
        assert_eq!(by_partner.len().unwrap(), 1);
        let dog_owners = t
            .objects("Dog")
            .unwrap()
            .filtered("owner.age > 20", &[])
            .unwrap();
        assert_eq!(dog_owners.len().unwrap(), 2);
        let with_friends = t
            .objects("Person")
            .unwrap()
            .filtered("friends.@count > 0", &[])
            .unwrap();
        assert_eq!(with_friends.len().unwrap(), 1);

        // Deleting the partner nulls the link and drops it from the list.
        let bob = t.object_for_primary_key("Person", 2).unwrap().unwrap();
        t.write(|| t.delete(&bob)).unwrap();
        assert!(ann.get("partner").unwrap().is_null());
        assert_eq!(ann.list("friends").unwrap().len().unwrap(), 0);
        assert!(!bob.is_valid());
        assert_eq!(bob.get("name").unwrap_err().kind(), ErrorKind::Invalidated);
    }

    #[test]
    fn results_listener_sees_inserts_deletes_and_modifications() {
        let t = TestRealm::memory(people_schema());
        for (id, name, age) in [(1, "Ann", 30), (2, "Bob", 40), (3, "Cid", 50)] {
            t.create_one("Person", person(id, name, age));
        }
        let adults = t.objects("Person").unwrap().filtered("age >= 18", &[]).unwrap();
        let seen = Arc::new(Mutex::new(Vec::<ChangeSet>::new()));
        let sink = Arc::clone(&seen);
        adults.add_listener(move |c| sink.lock().push(c.clone())).unwrap();

        t.write(|| {
            let bob = t.object_for_primary_key("Person", 2)?.unwrap();
            t.delete(&bob)?;
            let cid = t.object_for_primary_key("Person", 3)?.unwrap();
            cid.set("name", "Cyd")?;
            t.create("Person", person(4, "Dee", 20))?;
            Ok(())
        })
        .unwrap();
        t.deliver();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_empty());
        assert_eq!(seen[1].deletions, vec![1]);
        assert_eq!(seen[1].insertions, vec![2]);
        assert_eq!(seen[1].modifications, vec![1]);
        assert_eq!(seen[1].old_modifications, vec![2]);
    }

    #[test]
    fn listeners_only_run_after_delivery_and_can_be_removed() {
        let t = TestRealm::memory(people_schema());
        let ann = t.create_one("Person", person(1, "Ann", 30));
        let object_changes = Arc::new(Mutex::new(Vec::<ObjectChangeSet>::new()));
        let sink = Arc::clone(&object_changes);
        let token = ann.add_listener(move |c| sink.lock().push(c.clone())).unwrap();
        let realm_calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&realm_calls);
        t.add_listener(move |_| *counter.lock() += 1).unwrap();

        t.write(|| ann.set("age", 31)).unwrap();
        assert!(object_changes.lock().is_empty());
        t.deliver();
        assert_eq!(*realm_calls.lock(), 1);
        assert_eq!(
            object_changes.lock().last().unwrap().changed_properties,
            vec!["age".to_string()]
        );

        assert!(ann.remove_listener(token));
        let delivered = object_changes.lock().len();
        t.write(|| ann.set("age", 32)).unwrap();
        t.deliver();
        assert_eq!(object_changes.lock().len(), delivered);
        assert_eq!(*realm_calls.lock(), 2);
    }

    #[test]
    fn second_handle_sees_commits_after_refresh() {
        let t = TestRealm::memory(people_schema());
        let other = t.second_handle();
        let people = other.objects("Person").unwrap();
        t.create_one("Person", person(1, "Ann", 30));
        other.refresh();
        assert_eq!(people.len().unwrap(), 1);
    }

    #[test]
    fn embedded_objects_sets_and_mixed_values() {
        let t = TestRealm::memory(catalog_schema());
        let product = t.create_one(
            "Product",
            Value::object([
                ("sku", Value::from("A-1")),
                ("price", Value::from(9.5)),
                ("tags", Value::from(vec!["red", "red", "small"])),
                (
                    "dimensions",
                    Value::object([("width", Value::from(3)), ("height", Value::from(4))]),
                ),
                ("extra", Value::from(42)),
            ]),
        );
        let tags = product.set_collection("tags").unwrap();
        assert_eq!(tags.len().unwrap(), 2);
        t.write(|| {
            assert!(!tags.add("red")?);
            assert!(tags.add("blue")?);
            Ok(())
        })
        .unwrap();
        assert!(tags.has("blue").unwrap());

        let dims = product.get_object("dimensions").unwrap().unwrap();
        assert_eq!(dims.get("width").unwrap(), Value::Int(3));
        assert_eq!(
            t.objects("Dimensions").unwrap_err().to_string(),
            "You cannot query an embedded object: 'Dimensions'"
        );
        let wide = t
            .objects("Product")
            .unwrap()
            .filtered("dimensions.width >= 3 AND tags CONTAINS 'blue'", &[])
            .unwrap();
        assert_eq!(wide.len().unwrap(), 1);

        let json = product.to_json().unwrap();
        assert_eq!(json["dimensions"]["height"], serde_json::json!(4));
        assert_eq!(json["extra"], serde_json::json!(42));
    }

    #[test]
    fn file_store_survives_reopen_with_links() {
        let t = TestRealm::file(people_schema());
        t.write(|| {
            let ann = t.create("Person", person(1, "Ann", 30))?;
            let bob = t.create("Person", person(2, "Bob", 12))?;
            ann.list("friends")?.push([&bob])?;
            ann.list("nicknames")?.push(["annie", "a"])?;
            Ok(())
        })
        .unwrap();
        let t = t.reopen();
        let ann = t.object_for_primary_key("Person", 1).unwrap().unwrap();
        let friends = ann.list("friends").unwrap();
        assert_eq!(friends.len().unwrap(), 1);
        assert_eq!(
            friends.get_object(0).unwrap().unwrap().get("name").unwrap(),
            Value::from("Bob")
        );
        assert_eq!(
            ann.list("nicknames").unwrap().to_vec().unwrap(),
            vec![Value::from("annie"), Value::from("a")]
        );
    }
}
