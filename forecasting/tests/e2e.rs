use std::num::NonZeroUsize;

use chrono::{Days, NaiveDate};
use forecasting::{
    Dataset, NegativeBinomial, Targets, TemporalConvNet, checkpoint,
    features::{UsageScaler, build_features, make_sequence_windows, make_windows},
    specs::{ModelSpec, OptimizerSpec, TrainerSpec},
    training::{TimeSeriesSplit, TrainerBuilder, cross_validate},
};
use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng};

const SEQ_LEN: usize = 14;

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

/// Daily counts drawn from NB(50, 10) and their calendar features.
fn series(days: usize, seed: u64) -> (Array2<f64>, Vec<f64>, UsageScaler) {
    let mut rng = StdRng::seed_from_u64(seed);
    let usage: Vec<f64> = NegativeBinomial::new(50., 10.)
        .sample_n(&mut rng, days)
        .unwrap()
        .into_iter()
        .map(|c| c as f64)
        .collect();

    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let dates: Vec<NaiveDate> = (0..days as u64)
        .map(|d| start.checked_add_days(Days::new(d)).unwrap())
        .collect();

    let scaler = UsageScaler::fit(&usage).unwrap();
    let features = build_features(&dates, &usage, None, &scaler).unwrap();
    (features, usage, scaler)
}

fn synthetic(days: usize, seed: u64) -> Dataset {
    let (features, usage, _) = series(days, seed);
    make_windows(features.view(), &usage, SEQ_LEN, 1).unwrap()
}

fn spec(epochs: usize) -> TrainerSpec {
    TrainerSpec {
        model: ModelSpec::Tcn {
            input_size: nz(forecasting::features::FEATURES_PER_STEP),
            hidden_size: nz(8),
            kernel_size: nz(3),
            dilations: None,
            levels: Some(nz(2)),
            dropout: 0.1,
            seq_len: nz(SEQ_LEN),
            horizon: 1,
        },
        optimizer: OptimizerSpec::Adam {
            learning_rate: 0.05,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.,
        },
        loss: Default::default(),
        schedule: Default::default(),
        clip: None,
        early_stopping: None,
        epochs: nz(epochs),
        batch_size: nz(32),
        seed: Some(17),
    }
}

#[test]
fn training_lowers_the_validation_loss() {
    let data = synthetic(400, 1);
    let (train, valid) = data.split(0.8).unwrap();
    let mut trainer = TrainerBuilder::new().build(&spec(1)).unwrap();

    let batches: Vec<_> = train.batches(nz(32)).collect();
    trainer.train_step(&batches[0]).unwrap();
    let after_first = trainer.evaluate(&valid).unwrap();

    for batch in batches.iter().cycle().skip(1).take(99) {
        trainer.train_step(batch).unwrap();
    }
    let last = trainer.evaluate(&valid).unwrap();

    assert!(last.is_finite());
    assert!(last < after_first, "{last} >= {after_first}");
}

#[test]
fn fit_then_save_and_load_reproduces_forecasts() {
    let data = synthetic(200, 2);
    let (mut train, valid) = data.split(0.75).unwrap();
    let mut trainer = TrainerBuilder::new().build(&spec(3)).unwrap();

    let history = trainer.fit(&mut train, Some(&valid)).unwrap().to_vec();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|r| r.valid_loss.is_some_and(f64::is_finite)));

    let metrics = trainer.metrics(&valid, 0.9).unwrap();
    assert!((0. ..=1.).contains(&metrics.coverage));

    let mut model = trainer.into_model();
    let name = format!("forecasting-e2e-{}.json", std::process::id());
    let path = std::env::temp_dir().join(name);
    checkpoint::save(&model, &path).unwrap();
    let mut loaded: TemporalConvNet = checkpoint::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let expected = model.predict(valid.x()).unwrap();
    let got = loaded.predict(valid.x()).unwrap();
    assert_eq!(got, expected);
}

#[test]
fn cross_validation_reports_every_fold() {
    let data = synthetic(160, 3);
    let splitter = TimeSeriesSplit::new(nz(3)).with_gap(2);

    let reports = cross_validate(&spec(2), &data, &splitter, 0.8).unwrap();
    assert_eq!(reports.len(), 3);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.fold, i);
        assert!(report.valid_loss.is_finite());
        assert!(report.train_len > 0);
    }
    assert!(reports[0].train_len < reports[2].train_len);
}

#[test]
fn sequence_targets_forecast_every_step() {
    let (features, usage, scaler) = series(120, 4);
    let data = make_sequence_windows(features.view(), &usage, SEQ_LEN, 1).unwrap();

    let Targets::Sequence(y) = data.y() else {
        panic!("expected sequence targets");
    };
    for (i, window) in data.x().outer_iter().enumerate() {
        for t in 0..SEQ_LEN {
            assert!((scaler.inverse(window[[t, 0]]) - usage[i + t]).abs() < 1e-9);
            assert_eq!(y[[i, t]], usage[i + t + 1]);
        }
    }

    let (mut train, valid) = data.split(0.8).unwrap();
    let mut trainer = TrainerBuilder::new().build(&spec(2)).unwrap();
    let history = trainer.fit(&mut train, Some(&valid)).unwrap();
    assert!(history.iter().all(|r| r.train_loss.is_finite()));

    let forecasts = trainer.forecast(&valid).unwrap();
    assert_eq!(forecasts.len(), valid.len() * SEQ_LEN);
    assert!(forecasts.iter().all(|f| f.mean > 0. && f.dispersion > 0.));
}
