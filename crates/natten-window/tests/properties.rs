use natten_window::{AxisWindow, WindowGrid};
use proptest::prelude::*;

/// Valid axis: odd kernel, dilation, and an extent with room for the window.
fn axis_strategy() -> impl Strategy<Value = AxisWindow> {
    (0usize..5, 1usize..5, 0usize..24).prop_map(|(half, dilation, slack)| {
        let kernel = 2 * half + 1;
        AxisWindow::new(kernel * dilation + slack, kernel, dilation)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn every_window_has_kernel_size_taps(axis in axis_strategy()) {
        for p in 0..axis.extent() {
            let taps: Vec<usize> = axis.taps(p).collect();
            prop_assert_eq!(taps.len(), axis.kernel_size());
            prop_assert!(taps.contains(&p));
            prop_assert!(*taps.last().unwrap() < axis.extent());
            prop_assert!(taps.iter().all(|k| k % axis.dilation() == p % axis.dilation()));
        }
    }

    #[test]
    fn backward_window_inverts_forward(axis in axis_strategy()) {
        let n = axis.extent();
        for p in 0..n {
            for q in 0..n {
                let forward = axis.taps(q).any(|k| k == p);
                let backward = axis.producers(p).any(|x| x == q);
                prop_assert_eq!(forward, backward, "p={} q={} axis={:?}", p, q, axis);
            }
        }
    }

    #[test]
    fn rpb_index_tracks_relative_offset(axis in axis_strategy()) {
        let k = axis.kernel_size() as isize;
        let d = axis.dilation() as isize;
        for q in 0..axis.extent() {
            for (t, key) in axis.taps(q).enumerate() {
                let expected = k - 1 + (key as isize - q as isize) / d;
                prop_assert_eq!((axis.rpb_start(q) + t) as isize, expected);
                prop_assert!(axis.rpb_start(q) + t < axis.rpb_span());
            }
        }
    }

    #[test]
    fn grid_tap_roundtrip(a in axis_strategy(), b in axis_strategy()) {
        let grid = WindowGrid::from_axes(&[a, b]).unwrap();
        for flat in 0..grid.kernel_volume() {
            prop_assert_eq!(grid.tap_index(grid.split_tap(flat)), flat);
        }
    }
}

#[test]
fn dilated_scenario() {
    let axis = AxisWindow::new(6, 3, 2);
    assert_eq!(axis.taps(0).collect::<Vec<_>>(), vec![0, 2, 4]);
    assert!(axis.producers(4).any(|q| q == 0));
}
