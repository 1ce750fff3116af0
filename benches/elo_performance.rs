//! Performance benchmarks for the rating pipeline

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use elo_relay::amqp::{plain_change_event, stream_change_event};
use elo_relay::config::PipelineConfig;
use elo_relay::dead_letter::LoggingDeadLetterSink;
use elo_relay::pipeline::{ChangeEventAdapter, Orchestrator};
use elo_relay::rating::{EloCalculator, InMemoryRatingStore, RatingCalculator};
use elo_relay::types::{GameResult, PlayerSeed};
use std::sync::Arc;

fn create_bench_orchestrator(players: usize) -> Orchestrator {
    let seeds: Vec<PlayerSeed> = (0..players)
        .map(|i| PlayerSeed {
            player_id: format!("player_{}", i),
            rating: 1400 + (i as i64 % 20) * 10,
        })
        .collect();

    Orchestrator::new(
        Arc::new(InMemoryRatingStore::with_players(&seeds)),
        Arc::new(EloCalculator::default()),
        Arc::new(LoggingDeadLetterSink),
        PipelineConfig::default(),
    )
}

fn bench_elo_calculation(c: &mut Criterion) {
    let calculator = EloCalculator::default();

    c.bench_function("elo_calculation", |b| {
        b.iter(|| {
            black_box(calculator.calculate(
                black_box(1405),
                black_box(1645),
                GameResult::PlayerAWins,
            ))
        })
    });
}

fn bench_event_adaptation(c: &mut Criterion) {
    let adapter = ChangeEventAdapter::new();
    let plain = plain_change_event("INSERT", "GAME#1", "alice", "bob", 0.5);
    let stream = stream_change_event("INSERT", "GAME#1", "alice", "bob", 0.5);

    c.bench_function("adapt_plain_event", |b| {
        b.iter(|| black_box(adapter.adapt(black_box(&plain))))
    });

    c.bench_function("adapt_stream_event", |b| {
        b.iter(|| black_box(adapter.adapt(black_box(&stream))))
    });
}

fn bench_single_game_update(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let orchestrator = create_bench_orchestrator(100);
    let mut game = 0usize;

    c.bench_function("single_game_update", |b| {
        b.iter(|| {
            game += 1;
            let event = plain_change_event(
                "INSERT",
                &format!("bench-{}", game),
                &format!("player_{}", game % 100),
                &format!("player_{}", (game + 1) % 100),
                if game % 2 == 0 { 1.0 } else { 0.0 },
            );
            rt.block_on(async { black_box(orchestrator.process(&event).await) })
        })
    });
}

criterion_group!(
    benches,
    bench_elo_calculation,
    bench_event_adaptation,
    bench_single_game_update
);
criterion_main!(benches);
