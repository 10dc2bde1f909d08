use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use intent_cache::engine::rank_matches;
use intent_cache::store::{Ordinal, ScoredDocument, VariantDocument, VariantSource};
use std::hint::black_box;

/// `intents * variants` hits with variants of one intent close together
fn candidate_hits(intents: usize, variants: usize) -> Vec<ScoredDocument> {
    (0..intents)
        .flat_map(|intent| {
            (0..variants).map(move |variant| {
                let ordinal = Ordinal::new("0192f0a1-0000-7000-8000-000000000000", variant as u32);
                ScoredDocument {
                    document: VariantDocument {
                        key: format!("sc:doc:intent-{}:{}", intent, ordinal),
                        intent_id: format!("intent-{}", intent),
                        text: format!("variant {} of intent {}", variant, intent),
                        source: if variant == 0 {
                            VariantSource::Canonical
                        } else {
                            VariantSource::Generated
                        },
                        ordinal,
                        created_at: "2024-01-01T00:00:00Z".to_string(),
                        embedding: Vec::new(),
                    },
                    distance: (intent as f32).mul_add(0.01, variant as f32 * 0.001),
                }
            })
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank_matches");
    for (intents, variants) in [(10, 5), (100, 5), (500, 10)] {
        let hits = candidate_hits(intents, variants);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", intents, variants)),
            &hits,
            |b, hits| b.iter(|| rank_matches(black_box(hits.clone()), black_box(0.2), 5)),
        );
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
