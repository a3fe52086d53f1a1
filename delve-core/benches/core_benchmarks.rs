use criterion::{black_box, criterion_group, criterion_main, Criterion};
use delve_core::cache::{CacheConfig, ResponseCache};
use delve_core::crawler::ContentExtractor;
use delve_core::ranking::{Deduplicator, RankingScorer, ResultConsolidator, normalize_url};
use delve_core::types::{ProviderKind, Query, SearchResult};
use std::collections::BTreeMap;

const TOPICS: &[&str] = &[
    "flyway", "wetland", "banding", "stopover", "breeding", "wintering", "tracking", "habitat",
];

fn results(provider: &str, n: usize) -> Vec<SearchResult> {
    (0..n)
        .map(|i| {
            let topic = TOPICS[i % TOPICS.len()];
            SearchResult::new(
                format!("https://site{}.example.org/{topic}/{i}?utm_source=feed", i % 17),
                format!("Duck migration {topic} notes part {i}"),
                provider,
                ProviderKind::Mock,
            )
            .with_snippet(format!(
                "Observers recorded {topic} behaviour for mallards and teal in survey {i}."
            ))
            .with_relevance(1.0 - (i % 10) as f64 * 0.05)
        })
        .collect()
}

fn bench_url_normalization(c: &mut Criterion) {
    c.bench_function("normalize_clean_url", |b| {
        b.iter(|| normalize_url(black_box("https://birds.example.org/ducks/flyways")))
    });

    c.bench_function("normalize_tracking_url", |b| {
        b.iter(|| {
            normalize_url(black_box(
                "HTTPS://WWW.Birds.Example.org/ducks/?utm_source=news&utm_medium=email&page=2&gclid=abc#top",
            ))
        })
    });
}

fn bench_dedup(c: &mut Criterion) {
    let dedup = Deduplicator::default();
    let batch = results("alpha", 200);

    c.bench_function("dedup_200_results", |b| {
        b.iter(|| dedup.dedup(black_box(batch.clone())))
    });
}

fn bench_ranking(c: &mut Criterion) {
    let scorer = RankingScorer::default();
    let query = Query::new("duck migration flyway").unwrap();
    let batch = results("alpha", 100);

    c.bench_function("rank_100_results", |b| {
        b.iter(|| scorer.rank(black_box(&query), black_box(batch.clone())))
    });

    let consolidator = ResultConsolidator::default();
    let per_provider = BTreeMap::from([
        ("alpha".to_string(), results("alpha", 50)),
        ("beta".to_string(), results("beta", 50)),
        ("gamma".to_string(), results("gamma", 50)),
    ]);
    c.bench_function("consolidate_three_providers", |b| {
        b.iter(|| consolidator.consolidate(black_box(&query), black_box(per_provider.clone())))
    });
}

fn bench_cache(c: &mut Criterion) {
    let cache = ResponseCache::new(&CacheConfig::default());
    let query = Query::new("duck migration").unwrap();
    let key = query.cache_key();
    cache.put("alpha", &key, results("alpha", 10));

    c.bench_function("cache_hit", |b| {
        b.iter(|| cache.get(black_box("alpha"), black_box(&key)))
    });

    c.bench_function("cache_key", |b| b.iter(|| black_box(&query).cache_key()));
}

fn bench_extraction(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let extractor = ContentExtractor::new();
    let paragraph = "<p>Mallards migrate south along the Mississippi flyway every autumn. \
                     Biologists follow them with lightweight satellite tags.</p>";
    let html = format!(
        "<html><head><title>Duck flyways</title></head><body>\
         <nav><a href=\"/\">Home</a></nav><article>{}</article>\
         <footer>Copyright</footer></body></html>",
        paragraph.repeat(40)
    );

    c.bench_function("extract_article_page", |b| {
        b.iter(|| {
            rt.block_on(extractor.extract(
                black_box("https://birds.example.org/flyways"),
                black_box(&html),
            ))
        })
    });
}

criterion_group!(
    benches,
    bench_url_normalization,
    bench_dedup,
    bench_ranking,
    bench_cache,
    bench_extraction,
);
criterion_main!(benches);
