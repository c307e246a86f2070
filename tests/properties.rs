use phnn::dataset::TrajectoryBatch;
use phnn::finite_difference::PeriodicGrid;
use phnn::integrator::integrate;
use phnn::oscillator::DampedOscillator;
use proptest::prelude::*;

proptest! {
    #[test]
    fn central_difference_is_skew_symmetric(points in 3usize..40, length in 0.5f64..50.0) {
        let grid = PeriodicGrid::new(points, length);
        prop_assert!(grid.central().is_skew_symmetric(1e-9));
    }

    #[test]
    fn difference_operators_annihilate_constants(points in 3usize..40, value in -10.0f64..10.0) {
        let grid = PeriodicGrid::new(points, 7.0);
        let u = vec![value; points];
        for op in [grid.forward(), grid.central(), grid.second_central()] {
            prop_assert!(op.apply(&u).iter().all(|v| v.abs() < 1e-9));
        }
    }

    #[test]
    fn underdamped_closed_form_has_zero_residual(
        mu in 0.0f64..1.0,
        k in 1.0f64..10.0,
        t in 0.0f64..20.0,
    ) {
        let system = DampedOscillator::new(mu, k).unwrap();
        prop_assert!(system.residual(t).abs() < 1e-6);
    }

    #[test]
    fn rk4_trajectory_length_follows_step_count(horizon in 0.0f64..5.0, dt in 0.01f64..0.5) {
        let trajectory = integrate(|_, y| vec![-y[0]], &[1.0], horizon, dt).unwrap();
        prop_assert_eq!(trajectory.len(), (horizon / dt).round() as usize + 1);
        prop_assert!((trajectory.times.last().unwrap() - horizon).abs() < 1e-9 || trajectory.len() == 1);
    }

    #[test]
    fn trajectory_batch_split_recovers_shape(trajectories in 1usize..6, steps in 1usize..8, dim in 1usize..4) {
        use burn::backend::NdArray;
        let device = Default::default();
        let data: Vec<Vec<Vec<f64>>> = (0..trajectories)
            .map(|i| (0..steps).map(|s| (0..dim).map(|d| (i * 100 + s * 10 + d) as f64).collect()).collect())
            .collect();
        let batch = TrajectoryBatch::from_trajectories(&data).unwrap();
        let tensor = batch.to_tensor::<NdArray<f32>>(&device);
        let restored = TrajectoryBatch::from_tensor(tensor, trajectories, steps).unwrap();
        prop_assert_eq!(restored.trajectories, trajectories);
        prop_assert_eq!(restored.steps, steps);
        prop_assert_eq!(restored, batch);
    }
}
