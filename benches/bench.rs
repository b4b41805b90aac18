// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use visiter::{
    MemoryTable, PrefetchColumns, RowSource, SyntheticLayoutBuilder, VisBufferAccess,
    VisBufferComponent, VisIterConfig, VisibilityIterator,
};

fn get_sources() -> Vec<Arc<dyn RowSource>> {
    let layout = SyntheticLayoutBuilder::default()
        .n_antennas(16)
        .n_timesteps(20)
        .n_chans(32)
        .n_corrs(4)
        .n_fields(2)
        .build()
        .unwrap();
    vec![Arc::new(MemoryTable::synthesize(&layout).unwrap())]
}

fn get_prefetch() -> PrefetchColumns {
    PrefetchColumns::from_components([
        VisBufferComponent::Time,
        VisBufferComponent::NRow,
        VisBufferComponent::ObservedCube,
        VisBufferComponent::FlagCube,
        VisBufferComponent::ImagingWeight,
    ])
}

/// Read the same components a consumer with `get_prefetch` would.
fn sweep_data(vi: &mut VisibilityIterator) -> f32 {
    let mut total = 0.0;
    vi.origin_chunks().unwrap();
    while vi.more_chunks() {
        vi.origin().unwrap();
        while vi.more() {
            let vb = vi.vis_buffer();
            let flag_cube = vb.flag_cube().unwrap().clone();
            total += vb
                .vis_cube()
                .unwrap()
                .iter()
                .zip(flag_cube.iter())
                .filter(|(_, flag)| !**flag)
                .map(|(vis, _)| vis.norm())
                .sum::<f32>();
            total += vb.imaging_weight().unwrap().sum();
            vi.advance().unwrap();
        }
        vi.next_chunk().unwrap();
    }
    total
}

fn bench_sweep_sync(crt: &mut Criterion) {
    let sources = get_sources();
    crt.bench_function("sweep - sync", |bch| {
        bch.iter(|| {
            let mut vi =
                VisibilityIterator::new(sources.clone(), VisIterConfig::default()).unwrap();
            black_box(sweep_data(&mut vi));
            vi.finish().unwrap();
        })
    });
}

fn bench_sweep_async(crt: &mut Criterion) {
    let sources = get_sources();
    for n_buffers in [1, 2, 4] {
        let config = VisIterConfig {
            async_enabled: true,
            n_buffers,
            prefetch: get_prefetch(),
            ..VisIterConfig::default()
        };
        crt.bench_function(&format!("sweep - async, {} buffers", n_buffers), |bch| {
            bch.iter(|| {
                let mut vi = VisibilityIterator::new(sources.clone(), config.clone()).unwrap();
                black_box(sweep_data(&mut vi));
                vi.finish().unwrap();
            })
        });
    }
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_sweep_sync, bench_sweep_async
);
criterion_main!(benches);
