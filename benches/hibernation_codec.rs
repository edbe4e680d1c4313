use criterion::{Criterion, black_box, criterion_group, criterion_main};
use sonic_rs::json;

use hibernate_ws::core::{Arena, Attachment, deserialize_attachment, serialize_attachment};

fn bench_attachment_round_trip(c: &mut Criterion) {
    let small = json!({"user": "ada", "room": "lobby"});
    let history: Vec<String> = (0..256).map(|i| format!("\"message {i}\"")).collect();
    let large: Attachment = sonic_rs::from_str(&format!(
        r#"{{"user":"ada","history":[{}],"prefs":{{"theme":"dark","notify":true,"volume":0.8}}}}"#,
        history.join(",")
    ))
    .unwrap();

    c.bench_function("hibernate_1000_small_attachments", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                let bytes = serialize_attachment(black_box(&small)).unwrap();
                black_box(deserialize_attachment(&bytes).unwrap());
            }
        })
    });

    c.bench_function("hibernate_100_large_attachments", |b| {
        b.iter(|| {
            for _ in 0..100 {
                let bytes = serialize_attachment(black_box(&large)).unwrap();
                black_box(deserialize_attachment(&bytes).unwrap());
            }
        })
    });
}

fn bench_registry_churn(c: &mut Criterion) {
    c.bench_function("registry_churn_1024_sockets", |b| {
        let mut arena = Arena::with_capacity(1024);
        b.iter(|| {
            let keys: Vec<_> = (0..1024u32).map(|i| arena.insert(i)).collect();
            for key in keys.into_iter().rev() {
                black_box(arena.remove(key));
            }
        })
    });
}

criterion_group!(benches, bench_attachment_round_trip, bench_registry_churn);
criterion_main!(benches);
