use std::fs::File;
use std::io::{self, BufRead};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use piano_genie::keyboard::{map_key, KeyAction};
use piano_genie::registry::{get_config, DEFAULT_CFG_NAME};
use piano_genie::session::{Frontend, Genie, PianoView};
use piano_genie::weights::Weights;
use piano_genie::{Model, Sampler, SamplingType, UserParameters};

/// Plays Piano Genie from the terminal. Digits 1-8 are buttons, space
/// toggles the sustain pedal and `s` toggles the soft pedal.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = DEFAULT_CFG_NAME)]
    config: String,

    /// JSON weight map used instead of fetching the checkpoint
    #[arg(short, long)]
    weights: Option<String>,

    /// JSON user parameters replacing the configuration defaults
    #[arg(short, long)]
    params: Option<String>,

    #[arg(short, long)]
    sampling: Option<SamplingType>,

    /// [0, 1]
    #[arg(short = 'T', long)]
    temperature: Option<f32>,

    #[arg(long)]
    seed: Option<u64>,

    /// Keys to play; reads lines from stdin when absent
    #[arg(short, long)]
    keys: Option<String>,

    /// Time between consecutive presses
    #[arg(short, long, default_value_t = 250)]
    interval_ms: u64,
}

struct Terminal;

impl Frontend for Terminal {
    fn key_down(&mut self, note: u8, velocity: f32) {
        println!("note on  {note:>3} velocity {velocity:.1}");
    }

    fn key_up(&mut self, note: u8) {
        println!("note off {note:>3}");
    }

    fn redraw(&mut self, view: &PianoView) {
        if !view.predicted.is_empty() {
            log::debug!("next notes {:?}", view.predicted);
        }
    }

    fn set_loading(&mut self) {
        log::info!("loading model");
    }

    fn set_ready(&mut self) {
        log::info!("ready");
    }
}

/// Plays `keys`, tapping buttons and toggling pedals.
fn perform<F: Frontend>(
    genie: &mut Genie<F>,
    keys: &str,
    clock: &mut Instant,
    interval: Duration,
    pedals: &mut (bool, bool),
) -> Result<()> {
    for key in keys.chars() {
        match map_key(key, genie.num_buttons()) {
            Some(KeyAction::Sustain) => {
                pedals.0 = !pedals.0;
                genie.set_sustain(pedals.0);
            }
            Some(KeyAction::Soft) => {
                pedals.1 = !pedals.1;
                genie.set_soft(pedals.1);
            }
            Some(KeyAction::Button(button)) => {
                genie.press_at(button, *clock)?;
                genie.release(button);
                *clock += interval;
            }
            None => log::warn!("ignoring key {key:?}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = get_config(&args.config)?.clone();
    if let Some(path) = &args.params {
        let params: UserParameters = serde_json::from_reader(File::open(path)?)
            .with_context(|| format!("reading user parameters from {path}"))?;
        cfg.default_user_parameters = params;
    }
    if let Some(sampling_type) = args.sampling {
        cfg.default_user_parameters.sampling_type = sampling_type;
    }
    if let Some(temperature) = args.temperature {
        cfg.default_user_parameters.categorical_temperature = temperature;
    }

    let weights = match &args.weights {
        Some(path) => Some(Weights::from_json_reader(File::open(path)?)?),
        None => None,
    };
    let mut model = Model::new(cfg.model_cfg.clone());
    model.initialize(Some(&cfg.uri), weights).await?;

    let sampler = args.seed.map_or_else(Sampler::new, Sampler::from_seed);
    let mut genie = Genie::new(cfg, model, Terminal, sampler)?;

    let interval = Duration::from_millis(args.interval_ms);
    let mut clock = Instant::now();
    let mut pedals = (false, false);
    match &args.keys {
        Some(keys) => perform(&mut genie, keys, &mut clock, interval, &mut pedals)?,
        None => {
            for line in io::stdin().lock().lines() {
                perform(&mut genie, &line?, &mut clock, interval, &mut pedals)?;
            }
        }
    }
    genie.set_sustain(false);
    Ok(())
}

#[cfg(test)]
mod tests {
    use piano_genie::config::ModelConfig;
    use piano_genie::model::cell_prefix;
    use piano_genie::tensor::Tensor;
    use piano_genie::GenieConfig;

    use super::*;

    #[derive(Default)]
    struct Counter {
        downs: usize,
        ups: usize,
    }

    impl Frontend for Counter {
        fn key_down(&mut self, _note: u8, _velocity: f32) {
            self.downs += 1;
        }

        fn key_up(&mut self, _note: u8) {
            self.ups += 1;
        }
    }

    /// One-button autoregressive model with all-zero weights.
    async fn single_button_genie() -> Genie<Counter> {
        let model_cfg = ModelConfig::auto_no_enc().with_rnn_dims(1, 4);
        let units = model_cfg.rnn_units;
        let width = model_cfg.autoregressive_classes();
        let prefix = cell_prefix(&model_cfg, 0);
        let weights: Weights = [
            ("phero_model/decoder/rnn_input/dense/kernel".to_string(), vec![width, units]),
            ("phero_model/decoder/rnn_input/dense/bias".to_string(), vec![units]),
            (format!("{prefix}kernel"), vec![2 * units, 4 * units]),
            (format!("{prefix}bias"), vec![4 * units]),
            ("phero_model/decoder/pitches/dense/kernel".to_string(), vec![units, 88]),
            ("phero_model/decoder/pitches/dense/bias".to_string(), vec![88]),
        ]
        .into_iter()
        .map(|(name, layout)| (name, Tensor::zeros(&layout)))
        .collect();

        let cfg = GenieConfig {
            key: "single",
            name: "single",
            uri: String::new(),
            model_cfg: model_cfg.clone(),
            default_user_parameters: UserParameters::CATEGORICAL,
        };
        let mut model = Model::new(model_cfg);
        model.initialize(None, Some(weights)).await.unwrap();
        Genie::new(cfg, model, Counter::default(), Sampler::from_seed(3)).unwrap()
    }

    #[tokio::test]
    async fn test_digits_wrap_onto_available_buttons() {
        let mut genie = single_button_genie().await;
        assert_eq!(genie.num_buttons(), 1);

        let mut clock = Instant::now();
        let mut pedals = (false, false);
        perform(&mut genie, "12345x", &mut clock, Duration::from_millis(10), &mut pedals).unwrap();
        assert_eq!(genie.frontend().downs, 5);
        assert_eq!(genie.frontend().ups, 5);
    }

    #[tokio::test]
    async fn test_pedal_keys_toggle() {
        let mut genie = single_button_genie().await;
        let mut clock = Instant::now();
        let mut pedals = (false, false);
        perform(&mut genie, " 1s", &mut clock, Duration::from_millis(10), &mut pedals).unwrap();
        assert_eq!(pedals, (true, true));
        // sustained until the pedal lifts
        assert_eq!(genie.frontend().ups, 0);
        perform(&mut genie, " ", &mut clock, Duration::from_millis(10), &mut pedals).unwrap();
        assert_eq!(genie.frontend().ups, 1);
    }
}
