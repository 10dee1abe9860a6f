use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Map, Value, json};

/// Generate n random document namespaces; optional keys are sometimes left out
pub fn generate_random_namespaces(n: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(42); // Fixed seed for reproducibility
    let mut namespaces = Vec::with_capacity(n);

    for _ in 0..n {
        let items_count = rng.random_range(3..10);
        let mut items = Vec::with_capacity(items_count);
        for _ in 0..items_count {
            items.push(json!({
                "name": random_string(&mut rng, 3, 8),
                "price": rng.random_range(10..1000),
            }));
        }

        let mut namespace = Map::new();
        namespace.insert("title".into(), json!(random_string(&mut rng, 5, 12)));
        namespace.insert("items".into(), json!(items));
        namespace.insert("titlePage".into(), json!(rng.random_bool(0.5)));
        namespace.insert(
            "due".into(),
            json!(format!("{:02}-{:02}-2026", rng.random_range(1..=28), rng.random_range(1..=12))),
        );
        if rng.random_bool(0.7) {
            namespace.insert(
                "client".into(),
                json!({ "name": random_string(&mut rng, 4, 10), "vat": random_string(&mut rng, 8, 8) }),
            );
        }
        if rng.random_bool(0.5) {
            namespace.insert("subtitle".into(), json!(random_string(&mut rng, 5, 20)));
        }
        namespaces.push(Value::Object(namespace));
    }

    namespaces
}

/// Generate a random string with length between min and max
fn random_string(rng: &mut StdRng, min_len: usize, max_len: usize) -> String {
    let len = rng.random_range(min_len..=max_len);
    (0..len)
        .map(|_| char::from(b'a' + rng.random_range(0..26u8)))
        .collect()
}
