use criterion::{criterion_group, criterion_main, Criterion};
use slide_ink::clock::SystemClock;
use slide_ink::ink::{InkBufferStore, InkColor, InkStroke, StrokeSet};
use slide_ink::settings::InkTimings;
use std::sync::Arc;

fn strokes(count: usize) -> StrokeSet {
    StrokeSet::new(
        (0..count)
            .map(|i| {
                let i = i as i32;
                InkStroke::pen(
                    InkColor::rgba(255, 255, 0, 255),
                    4,
                    (0..64).map(|p| (i * 3 + p, i * 7 - p)).collect(),
                )
            })
            .collect(),
    )
}

fn bench_ink_store(c: &mut Criterion) {
    let store = InkBufferStore::new(InkTimings::default(), Arc::new(SystemClock));
    store.reset_for(40);
    let payload = strokes(50);

    c.bench_function("save_current_slide_50_strokes", |b| {
        b.iter(|| store.force_save(7, &payload))
    });

    for slide in 1..=40 {
        store.force_save(slide, &payload);
    }
    let mut slide = 0;
    c.bench_function("switch_to_with_load", |b| {
        b.iter(|| {
            slide = slide % 40 + 1;
            store.switch_to(slide)
        })
    });
}

criterion_group!(benches, bench_ink_store);
criterion_main!(benches);
