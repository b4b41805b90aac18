// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use float_cmp::{approx_eq, F32Margin};
use visiter::{
    constants::{ENV_ASYNC_ENABLED, ENV_ASYNC_NBUFFERS, SWEEP_TIME_TOLERANCE},
    marlu::ndarray::{array, Array2, Array3},
    vis_buffer::ScalarValue,
    source::error::SourceError,
    compare_sweeps, sweep, Column, PrefetchColumns, RowSource, SubChunkPair, SyntheticLayoutBuilder,
    VisBuffer, VisBufferAccess, VisBufferAsync, VisBufferAsyncWrapper, VisBufferComponent,
    VisIterConfig, VisIterConfigBuilder, VisIterError, VisibilityIterator,
};

mod common;
use common::{async_vi, mixed_layout, one_baseline_layout, sync_vi, table_source, FailingSource};

use VisBufferComponent as C;

#[test]
fn test_one_baseline_sync_and_async_sweeps_agree() {
    let source = table_source(&one_baseline_layout());

    let expected = sweep(&mut sync_vi(vec![source.clone()])).unwrap();

    let prefetch = PrefetchColumns::from_components([C::Time, C::NRow, C::Ant1, C::Ant2, C::FlagCube]);
    let mut vi = async_vi(vec![source.clone()], prefetch, 2);
    let received = sweep(&mut vi).unwrap();
    vi.finish().unwrap();

    assert_eq!(expected.len(), 3);
    assert_eq!(received.len(), 3);
    assert!(compare_sweeps(&expected, &received, SWEEP_TIME_TOLERANCE).is_empty());
    for (idx, info) in received.iter().enumerate() {
        assert_eq!(info.pair, SubChunkPair::new(0, idx));
        assert_eq!(info.n_rows, 1);
        assert_abs_diff_eq!(info.time, 1_254_670_392.0 + 2.0 * idx as f64);
    }
}

#[test]
fn test_one_baseline_async_values() {
    let source = table_source(&one_baseline_layout());
    let prefetch = PrefetchColumns::from_components([C::Time, C::NRow, C::Ant1, C::Ant2, C::FlagCube]);
    let mut vi = async_vi(vec![source], prefetch, 2);

    let mut row = 0;
    vi.origin_chunks().unwrap();
    while vi.more_chunks() {
        vi.origin().unwrap();
        while vi.more() {
            let vb = vi.vis_buffer();
            assert_eq!(vb.n_row().unwrap(), 1);
            assert_eq!(vb.antenna1().unwrap(), &array![0]);
            assert_eq!(vb.antenna2().unwrap(), &array![1]);
            assert_eq!(vb.time().unwrap(), &array![1_254_670_392.0 + 2.0 * row as f64]);
            // synthetic flags are set where (row + chan + corr) % 5 == 0
            let expected_flags =
                Array3::from_shape_fn((2, 4, 1), |(p, c, _)| (row + c + p) % 5 == 0);
            assert_eq!(vb.flag_cube().unwrap(), &expected_flags);

            match vb.uvw() {
                Err(VisIterError::NotPrefetched { component, function, .. }) => {
                    assert_eq!(component, C::Uvw);
                    assert_eq!(function, "uvw");
                }
                Err(e) => panic!("expected a prefetch miss, not {}", e),
                Ok(_) => panic!("expected a prefetch miss"),
            }
            row += 1;
            vi.advance().unwrap();
        }
        vi.next_chunk().unwrap();
    }
    assert_eq!(row, 3);
    vi.finish().unwrap();
}

#[test]
fn test_sweep_order_equivalence() {
    let layouts = vec![
        one_baseline_layout(),
        mixed_layout(),
        SyntheticLayoutBuilder::default()
            .n_timesteps(7)
            .integration_time(0.5)
            .build()
            .unwrap(),
    ];
    let configs = vec![
        (0.0, 0),
        (1.0, 0),
        (3.0, 2),
        (0.0, 5),
    ];
    let prefetch = PrefetchColumns::from_components([C::Time, C::NRow]);
    for layout in &layouts {
        // two tables, so the iterators cross a table boundary
        let sources = vec![table_source(layout), table_source(layout)];
        for &(time_interval, row_blocking) in &configs {
            let sync_config = VisIterConfig {
                time_interval,
                row_blocking,
                ..VisIterConfig::default()
            };
            let async_config = VisIterConfig {
                async_enabled: true,
                prefetch: prefetch.clone(),
                ..sync_config.clone()
            };
            for n_buffers in [1, 2, 4] {
                let mut sync = VisibilityIterator::new(sources.clone(), sync_config.clone()).unwrap();
                let mut r#async = VisibilityIterator::new(
                    sources.clone(),
                    VisIterConfig {
                        n_buffers,
                        ..async_config.clone()
                    },
                )
                .unwrap();
                let expected = sweep(&mut sync).unwrap();
                let received = sweep(&mut r#async).unwrap();
                r#async.finish().unwrap();
                let differences = compare_sweeps(&expected, &received, SWEEP_TIME_TOLERANCE);
                assert!(
                    differences.is_empty(),
                    "{:?} interval={} blocking={} n_buffers={}: {:?}",
                    layout,
                    time_interval,
                    row_blocking,
                    n_buffers,
                    differences
                );
                let rows: usize = expected.iter().map(|info| info.n_rows).sum();
                assert_eq!(rows, sources.iter().map(|s| s.num_rows()).sum::<usize>());
            }
        }
    }
}

#[test]
fn test_fresh_buffers_hold_sentinels() {
    let vba = VisBufferAsync::new();
    for &component in VisBufferComponent::ALL {
        assert!(!vba.is_valid(component));
        if let Some(value) = vba.peek_scalar(component) {
            assert!(value.is_sentinel(), "{} is {:?}", component, value);
        }
    }
    assert_eq!(vba.peek_scalar(C::NRow), Some(ScalarValue::Int(-1)));
    assert_eq!(vba.peek_scalar(C::NewMs), Some(ScalarValue::Bool(false)));

    let mut wrapper = VisBufferAsyncWrapper::new();
    assert!(matches!(
        wrapper.n_row(),
        Err(VisIterError::NoAttachedBuffer { function: "n_row", .. })
    ));

    let mut vb = VisBuffer::new();
    assert!(matches!(
        vb.n_row(),
        Err(VisIterError::NotAttached { .. })
    ));
}

#[test]
fn test_prefetch_completeness() {
    let source = table_source(&mixed_layout());
    let prefetch = PrefetchColumns::from_components([
        C::Time,
        C::NRow,
        C::FieldId,
        C::SpW,
        C::Freq,
        C::WeightMat,
        C::PhaseCenter,
    ]);
    let mut vi = async_vi(vec![source], prefetch.clone(), 2);

    let expected_valid: Vec<_> = prefetch.iter().collect();
    vi.origin_chunks().unwrap();
    while vi.more_chunks() {
        vi.origin().unwrap();
        while vi.more() {
            let vb = vi.vis_buffer();
            let mut valid = vb.valid_components();
            valid.sort();
            let mut expected = expected_valid.clone();
            expected.sort();
            assert_eq!(valid, expected);

            for &component in VisBufferComponent::ALL {
                if prefetch.contains(component) {
                    continue;
                }
                assert!(!vb.is_valid(component));
            }
            assert!(matches!(
                vb.antenna1(),
                Err(VisIterError::NotPrefetched { component: C::Ant1, .. })
            ));
            assert!(matches!(
                vb.new_ms(),
                Err(VisIterError::NotPrefetched { component: C::NewMs, .. })
            ));
            vi.advance().unwrap();
        }
        vi.next_chunk().unwrap();
    }
    vi.finish().unwrap();
}

#[test]
fn test_copied_buffers_are_isolated() {
    let source = table_source(&one_baseline_layout());
    let prefetch = PrefetchColumns::from_components([C::Time, C::NRow, C::Epoch, C::PhaseCenter]);
    let mut vi = async_vi(vec![source], prefetch, 2);
    vi.origin_chunks().unwrap();
    vi.origin().unwrap();

    let mut first = vi.copy_vis_buffer().unwrap();
    let mut second = vi.copy_vis_buffer().unwrap();

    let first_epoch = first.epoch().unwrap().clone();
    let second_epoch = second.epoch().unwrap().clone();
    assert!(!first_epoch.frame.ptr_eq(&second_epoch.frame));
    let before = second_epoch.frame.read().epoch_gpst_seconds;

    first_epoch.frame.set_epoch(0.0);
    assert_eq!(first.epoch().unwrap().frame.read().epoch_gpst_seconds, Some(0.0));
    assert_eq!(second.epoch().unwrap().frame.read().epoch_gpst_seconds, before);
    assert_eq!(
        vi.vis_buffer().epoch().unwrap().frame.read().epoch_gpst_seconds,
        before
    );

    let first_centre = first.phase_center().unwrap().clone();
    first_centre.frame.set_epoch(1.0);
    assert_ne!(
        second.phase_center().unwrap().frame.read().epoch_gpst_seconds,
        Some(1.0)
    );

    // the copies outlive the iterator
    vi.finish().unwrap();
    assert_eq!(second.time().unwrap(), &array![1_254_670_392.0]);
}

#[test]
fn test_async_weight_ramp_reads_back_synchronously() {
    let layout = mixed_layout();
    let source = table_source(&layout);
    let n_corrs = layout.n_corrs;

    let prefetch = PrefetchColumns::from_components([C::Time, C::NRow, C::NCorr]);
    let mut vi = async_vi(vec![source.clone()], prefetch, 2);
    let mut ramp = 0_usize;
    let mut n_subchunks = 0_usize;
    vi.origin_chunks().unwrap();
    while vi.more_chunks() {
        vi.origin().unwrap();
        while vi.more() {
            let vb = vi.vis_buffer();
            let n_row = vb.n_row().unwrap() as usize;
            assert_eq!(vb.n_corr().unwrap() as usize, n_corrs);
            let weight_mat =
                Array2::from_shape_fn((n_corrs, n_row), |(p, r)| ((ramp + r) * n_corrs + p) as f32);
            vi.write_weight_mat(weight_mat).unwrap();
            ramp += n_row;
            n_subchunks += 1;
            vi.advance().unwrap();
        }
        vi.next_chunk().unwrap();
    }
    assert_eq!(vi.finish().unwrap(), n_subchunks);
    assert_eq!(ramp, source.num_rows());

    // every write is in the table once finish returns
    let mut vi = sync_vi(vec![source]);
    let mut row = 0_usize;
    vi.origin_chunks().unwrap();
    while vi.more_chunks() {
        vi.origin().unwrap();
        while vi.more() {
            let vb = vi.vis_buffer();
            let weight_mat = vb.weight_mat().unwrap().clone();
            for ((p, r), &weight) in weight_mat.indexed_iter() {
                assert_abs_diff_eq!(weight, ((row + r) * n_corrs + p) as f32, epsilon = 1e-6);
            }
            row += weight_mat.ncols();
            vi.advance().unwrap();
        }
        vi.next_chunk().unwrap();
    }
    assert_eq!(row, ramp);
}

#[test]
fn test_flags_and_imaging_weights_agree_across_modes() {
    let source = table_source(&mixed_layout());

    let mut sync_values = vec![];
    let mut vi = sync_vi(vec![source.clone()]);
    vi.origin_chunks().unwrap();
    while vi.more_chunks() {
        vi.origin().unwrap();
        while vi.more() {
            let pair = vi.subchunk();
            let vb = vi.vis_buffer();
            sync_values.push((
                pair,
                vb.flag_cube().unwrap().clone(),
                vb.imaging_weight().unwrap().clone(),
            ));
            vi.advance().unwrap();
        }
        vi.next_chunk().unwrap();
    }

    let prefetch = PrefetchColumns::from_components([C::Time, C::NRow, C::FlagCube, C::ImagingWeight]);
    let mut vi = async_vi(vec![source], prefetch, 3);
    let mut expected = sync_values.iter();
    vi.origin_chunks().unwrap();
    while vi.more_chunks() {
        vi.origin().unwrap();
        // weights may differ relative to the largest weight in the chunk
        let scale = sync_values
            .iter()
            .filter(|(pair, ..)| pair.chunk == vi.subchunk().chunk)
            .flat_map(|(_, _, weights)| weights.iter().copied())
            .fold(0.0_f32, |acc, w| acc.max(w.abs()));
        while vi.more() {
            let pair = vi.subchunk();
            let (sync_pair, sync_flags, sync_weights) = expected.next().unwrap();
            assert_eq!(pair, *sync_pair);
            let vb = vi.vis_buffer();
            assert_eq!(vb.flag_cube().unwrap(), sync_flags);
            for (&received, &expected) in vb.imaging_weight().unwrap().iter().zip(sync_weights.iter()) {
                assert!(approx_eq!(
                    f32,
                    received,
                    expected,
                    F32Margin::default().epsilon(scale * 1e-6)
                ));
            }
            vi.advance().unwrap();
        }
        vi.next_chunk().unwrap();
    }
    assert!(expected.next().is_none());
    vi.finish().unwrap();
}

#[test]
fn test_env_overrides_select_async() {
    std::env::set_var(ENV_ASYNC_ENABLED, "yes");
    std::env::set_var(ENV_ASYNC_NBUFFERS, "3");
    let config = VisIterConfigBuilder::default()
        .prefetch(PrefetchColumns::from_components([C::Time, C::NRow]))
        .build()
        .unwrap()
        .with_env_overrides()
        .unwrap();
    assert!(config.async_enabled);
    assert_eq!(config.n_buffers, 3);

    let source = table_source(&one_baseline_layout());
    let mut vi = VisibilityIterator::new(vec![source], config).unwrap();
    assert!(vi.is_async());
    assert_eq!(sweep(&mut vi).unwrap().len(), 3);
    vi.finish().unwrap();

    std::env::set_var(ENV_ASYNC_NBUFFERS, "0");
    assert!(matches!(
        VisIterConfig::default().with_env_overrides(),
        Err(VisIterError::BadConfig(_))
    ));

    std::env::remove_var(ENV_ASYNC_ENABLED);
    std::env::remove_var(ENV_ASYNC_NBUFFERS);
    assert!(!VisIterConfig::default().with_env_overrides().unwrap().async_enabled);
}

#[test]
fn test_sync_writes_are_visible_at_once() {
    let source = table_source(&one_baseline_layout());
    let mut vi = sync_vi(vec![source.clone()]);
    vi.origin_chunks().unwrap();
    vi.origin().unwrap();
    assert_eq!(vi.vis_buffer().flag_row().unwrap(), &array![false]);
    vi.write_flag_row(array![true]).unwrap();
    assert_eq!(vi.vis_buffer().flag_row().unwrap(), &array![true]);
    vi.finish().unwrap();

    let flag_row = source
        .read_column(0..3, Column::FlagRow)
        .unwrap()
        .into_bool(Column::FlagRow)
        .unwrap();
    assert_eq!(flag_row, array![true, false, false]);
}

#[test]
fn test_async_read_error_surfaces_on_origin_chunks() {
    // no CORRECTED_DATA column in the default layout
    let source = table_source(&one_baseline_layout());
    assert!(!source.has_column(Column::CorrectedData));
    let prefetch = PrefetchColumns::from_components([C::Time, C::NRow, C::CorrectedCube]);
    let mut vi = async_vi(vec![source], prefetch, 2);

    assert!(matches!(
        vi.origin_chunks(),
        Err(VisIterError::Source(SourceError::MissingColumn(Column::CorrectedData)))
    ));
    assert!(!vi.more_chunks());
    assert!(!vi.more());
    assert!(matches!(
        vi.origin_chunks(),
        Err(VisIterError::Source(SourceError::MissingColumn(Column::CorrectedData)))
    ));
    assert_eq!(vi.finish().unwrap(), 0);
}

#[test]
fn test_async_read_error_mid_sweep_keeps_earlier_buffers() {
    let source: Arc<dyn RowSource> = Arc::new(FailingSource {
        inner: table_source(&one_baseline_layout()),
        column: Column::Time,
        fail_from: 2,
    });
    let prefetch = PrefetchColumns::from_components([C::Time, C::NRow]);
    for n_buffers in [1, 2, 4] {
        let mut vi = async_vi(vec![source.clone()], prefetch.clone(), n_buffers);
        vi.origin_chunks().unwrap();
        vi.origin().unwrap();

        let mut times = vec![];
        let error = loop {
            times.push(vi.vis_buffer().time().unwrap()[0]);
            if let Err(e) = vi.advance() {
                break e;
            }
            assert!(vi.more(), "n_buffers={}", n_buffers);
        };
        assert!(matches!(
            error,
            VisIterError::Source(SourceError::MissingColumn(Column::Time))
        ));
        assert_eq!(times, vec![1_254_670_392.0, 1_254_670_394.0]);
        assert!(!vi.more());

        vi.next_chunk().unwrap();
        assert!(!vi.more_chunks());
        vi.finish().unwrap();
    }
}

#[test]
fn test_sync_read_error_keeps_chunk_position() {
    let good = table_source(&one_baseline_layout());
    let bad: Arc<dyn RowSource> = Arc::new(FailingSource {
        inner: table_source(&one_baseline_layout()),
        column: Column::Time,
        fail_from: 0,
    });
    let mut vi = sync_vi(vec![good, bad]);

    let mut n_subchunks = 0;
    vi.origin_chunks().unwrap();
    let (chunk, error) = loop {
        vi.origin().unwrap();
        while vi.more() {
            n_subchunks += 1;
            vi.advance().unwrap();
        }
        let chunk = vi.subchunk().chunk;
        if let Err(e) = vi.next_chunk() {
            break (chunk, e);
        }
        assert!(vi.more_chunks());
    };
    assert!(matches!(
        error,
        VisIterError::Source(SourceError::MissingColumn(Column::Time))
    ));
    assert_eq!(n_subchunks, 3);

    // the failed move leaves the iterator where it was
    assert!(vi.more_chunks());
    vi.origin().unwrap();
    assert!(vi.more());
    assert_eq!(vi.subchunk(), SubChunkPair::new(chunk, 0));
    assert_eq!(vi.vis_buffer().time().unwrap(), &array![1_254_670_392.0]);
    vi.finish().unwrap();
}
