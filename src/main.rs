use std::{env, fs::File, io::BufReader};

use anyhow::{Context, Result, bail};
use chrono::{Datelike, Days, NaiveDate, Weekday};
use forecasting::{
    NegativeBinomial, checkpoint,
    features::{FEATURES_PER_STEP, RiskSignals, UsageScaler, build_features, make_windows},
    specs::TrainerSpec,
    training::TrainerBuilder,
};
use log::info;
use rand::{Rng, SeedableRng, rngs::StdRng};

const DEFAULT_SPEC: &str = r#"{
    "model": {
        "tcn": {
            "input_size": 14,
            "hidden_size": 16,
            "kernel_size": 3,
            "levels": 4,
            "dropout": 0.1,
            "seq_len": 28
        }
    },
    "optimizer": {
        "adam_w": {
            "learning_rate": 0.01,
            "beta1": 0.9,
            "beta2": 0.999,
            "epsilon": 1e-8,
            "weight_decay": 0.0001
        }
    },
    "schedule": { "cosine": { "t_max": 40, "min_lr": 0.001 } },
    "clip": { "norm": { "max_norm": 5.0, "norm": "l2" } },
    "early_stopping": { "patience": 8, "min_delta": 0.001, "restore_best": true },
    "epochs": 40,
    "batch_size": 32,
    "seed": 42
}"#;

const DAYS: usize = 730;
const LEVEL: f64 = 0.9;

fn read_spec(path: Option<&String>) -> Result<TrainerSpec> {
    let spec = match path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening spec {path}"))?;
            serde_json::from_reader(BufReader::new(file))?
        }
        None => serde_json::from_str(DEFAULT_SPEC)?,
    };

    Ok(spec)
}

/// Two years of daily counts with a weekly cycle and occasional events.
fn synthetic_series(rng: &mut StdRng) -> Result<(Vec<NaiveDate>, Vec<f64>, Vec<RiskSignals>)> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).context("invalid start date")?;

    let mut dates = Vec::with_capacity(DAYS);
    let mut usage = Vec::with_capacity(DAYS);
    let mut risks = Vec::with_capacity(DAYS);
    for day in 0..DAYS as u64 {
        let date = start
            .checked_add_days(Days::new(day))
            .context("date out of range")?;
        let signals = RiskSignals {
            event: f64::from(u8::from(rng.random_bool(0.05))),
            weather_severity: rng.random(),
            traffic_index: rng.random(),
            hazard: 0.,
        };

        let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        let mean = 40. + if weekend { 15. } else { 0. } + 25. * signals.event
            - 10. * signals.weather_severity;
        let count = NegativeBinomial::new(mean, 12.).sample(rng)?;

        dates.push(date);
        usage.push(count as f64);
        risks.push(signals);
    }

    Ok((dates, usage, risks))
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let spec = read_spec(args.get(1))?;
    let out = args.get(2).map_or("forecast.json", String::as_str);

    let builder = TrainerBuilder::new();
    let config = builder.resolve_model(&spec.model);
    if config.input_size != FEATURES_PER_STEP {
        bail!(
            "the model takes {} features per step, the series has {FEATURES_PER_STEP}",
            config.input_size
        );
    }

    let mut rng = StdRng::seed_from_u64(spec.seed.unwrap_or(0));
    let (dates, usage, risks) = synthetic_series(&mut rng)?;

    let train_days = DAYS * 4 / 5;
    let scaler = UsageScaler::fit(&usage[..train_days])?;
    let features = build_features(&dates, &usage, Some(&risks), &scaler)?;
    let data = make_windows(features.view(), &usage, config.seq_len, config.horizon)?;
    let (mut train, valid) = data.split(0.8)?;
    info!(train = train.len(), valid = valid.len(); "built windows");

    let mut trainer = builder.build(&spec)?;
    let history = trainer.fit(&mut train, Some(&valid))?;
    if let Some(last) = history.last() {
        info!(epochs = history.len(), train_loss = last.train_loss; "finished training");
    }

    let metrics = trainer.metrics(&valid, LEVEL)?;
    info!(
        mae = metrics.mae,
        rmse = metrics.rmse,
        nll = metrics.nll,
        coverage = metrics.coverage;
        "validation metrics"
    );

    let mut model = trainer.into_model();
    checkpoint::save(&model, out)?;

    let Some(start) = valid.len().checked_sub(1) else {
        return Ok(());
    };
    let last = valid.subset(start..valid.len())?;
    if let Some(forecast) = model.predict(last.x())?.first() {
        let (lo, hi) = forecast.quantile_interval(LEVEL)?;
        println!(
            "next day: mean {:.1}, dispersion {:.2}, {:.0}% interval [{lo}, {hi}]",
            forecast.mean,
            forecast.dispersion,
            LEVEL * 100.
        );
    }

    Ok(())
}
