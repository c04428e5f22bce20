//! Interactive Piano Genie session.
//!
//! A session runs in one of two modes, fixed by the active configuration:
//!
//! - look-ahead: a standing batch holds, for every button, the state and
//!   prediction that pressing it next would produce. A press plays the
//!   precomputed note at once and then recomputes all continuations in one
//!   batched step.
//! - extempore: each press is evaluated on demand with a batch of one, which
//!   allows delta-time features and the cache-based samplers.
//!
//! All operations take `&mut self`, so presses, resets and model switches
//! are serialized by whoever owns the session.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::cache::{ButtonCache, NeuralCache};
use crate::config::{LOWEST_MIDI_NOTE, START_SENTINEL};
use crate::keyboard::{map_key, KeyAction};
use crate::registry::{GenieConfig, UserParameters};
use crate::sampler::{Sampler, SamplingType};
use crate::{model::Model, state::LstmState, weights::Weights, GenieError, Result};

const NORMAL_VELOCITY: f32 = 0.8;
const SOFT_VELOCITY: f32 = 0.2;
/// Delta time reported for the first press of a session.
const NO_PREVIOUS_PRESS: Duration = Duration::from_secs(100_000);

/// Host side of a session: sound and drawing.
pub trait Frontend {
    fn key_down(&mut self, note: u8, velocity: f32);

    fn key_up(&mut self, note: u8);

    fn redraw(&mut self, _view: &PianoView) {}

    fn set_loading(&mut self) {}

    fn set_ready(&mut self) {}
}

/// What the piano should show.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PianoView {
    /// button -> MIDI note it is holding
    pub held: BTreeMap<usize, u8>,
    /// look-ahead note per button, empty in extempore mode
    pub predicted: Vec<u8>,
}

pub fn output_to_note(output: usize) -> u8 {
    (LOWEST_MIDI_NOTE as usize + output).min(127) as u8
}

struct LookAhead {
    /// (num_buttons, units) per layer
    state: LstmState,
    preds: Vec<usize>,
}

struct Extempore {
    state: LstmState,
    last_output: i32,
    last_press: Option<Instant>,
    neural_cache: NeuralCache,
    button_cache: ButtonCache,
}

/// Exactly one of the two recurrent states is alive at any time.
enum Mode {
    LookAhead(LookAhead),
    Extempore(Extempore),
}

/// Held buttons, pedals and the frontend they drive.
struct Keys<F> {
    frontend: F,
    button_to_note: BTreeMap<usize, u8>,
    sustain_down: bool,
    sustained: BTreeSet<u8>,
    soft_down: bool,
}

impl<F: Frontend> Keys<F> {
    fn play(&mut self, button: usize, output: usize) -> u8 {
        let note = output_to_note(output);
        if self.sustain_down {
            if self.sustained.contains(&note) {
                self.frontend.key_up(note);
            }
            self.sustained.insert(note);
        }
        let velocity = if self.soft_down {
            SOFT_VELOCITY
        } else {
            NORMAL_VELOCITY
        };
        self.frontend.key_down(note, velocity);
        self.button_to_note.insert(button, note);
        note
    }

    fn release(&mut self, button: usize) -> Option<u8> {
        let note = self.button_to_note.remove(&button)?;
        if self.sustain_down {
            self.sustained.insert(note);
        } else {
            self.frontend.key_up(note);
        }
        Some(note)
    }

    fn set_sustain(&mut self, down: bool) {
        self.sustain_down = down;
        if down {
            return;
        }
        let held: BTreeSet<u8> = self.button_to_note.values().copied().collect();
        for note in std::mem::take(&mut self.sustained) {
            if !held.contains(&note) {
                self.frontend.key_up(note);
            }
        }
    }

    /// Lets go of every button. Notes stop now, or when the pedal lifts if
    /// it is down.
    fn clear_held(&mut self) {
        for (_, note) in std::mem::take(&mut self.button_to_note) {
            if self.sustain_down {
                self.sustained.insert(note);
            } else {
                self.frontend.key_up(note);
            }
        }
    }

    fn view(&self, predicted: &[usize]) -> PianoView {
        PianoView {
            held: self.button_to_note.clone(),
            predicted: predicted.iter().map(|&p| output_to_note(p)).collect(),
        }
    }

    fn redraw(&mut self, predicted: &[usize]) {
        let view = self.view(predicted);
        self.frontend.redraw(&view);
    }
}

fn check_config(cfg: &GenieConfig) -> Result<()> {
    if cfg.model_cfg.num_buttons() == 0 {
        return Err(GenieError::InvalidConfig(format!(
            "`{}` has no buttons",
            cfg.key
        )));
    }
    if cfg.default_user_parameters.look_ahead && cfg.model_cfg.uses_delta_time() {
        return Err(GenieError::InvalidConfig(format!(
            "`{}` uses delta times, which cannot be precomputed by look-ahead",
            cfg.key
        )));
    }
    cfg.default_user_parameters.validate()
}

/// Evaluates every button as the next press from `state`.
///
/// Predictions follow the live user parameters and are drawn at
/// `categorical_temperature`, not from the plain model distribution, so the
/// temperature knob shapes look-ahead the same way it shapes extempore play.
fn look_ahead(
    model: &Model,
    sampler: &mut Sampler,
    params: &UserParameters,
    state: &LstmState,
    last_output: i32,
) -> Result<LookAhead> {
    let num_buttons = model.config().num_buttons();
    let buttons: Vec<usize> = (0..num_buttons).collect();
    let last_outputs = vec![last_output; num_buttons];
    let (state, logits) = model.evaluate(state, &buttons, Some(&last_outputs), None)?;
    // the cache samplers need a single true history, so look-ahead draws
    // categorically
    let preds = match params.sampling_type {
        SamplingType::Greedy => sampler.greedy(&logits),
        _ => sampler.categorical(&logits, params.categorical_temperature),
    };
    Ok(LookAhead { state, preds })
}

fn initial_mode(model: &Model, cfg: &GenieConfig, sampler: &mut Sampler) -> Result<Mode> {
    let params = cfg.default_user_parameters;
    if params.look_ahead {
        let zero = model.create_zero_state(cfg.model_cfg.num_buttons());
        let la = look_ahead(model, sampler, &params, &zero, START_SENTINEL)?;
        Ok(Mode::LookAhead(la))
    } else {
        Ok(Mode::Extempore(Extempore {
            state: model.create_zero_state(1),
            last_output: START_SENTINEL,
            last_press: None,
            neural_cache: NeuralCache::default(),
            button_cache: ButtonCache::default(),
        }))
    }
}

pub struct Genie<F: Frontend> {
    cfg: GenieConfig,
    model: Model,
    params: UserParameters,
    sampler: Sampler,
    mode: Mode,
    keys: Keys<F>,
}

impl<F: Frontend> Genie<F> {
    /// Starts a session on an initialized `model` built for `cfg`.
    pub fn new(cfg: GenieConfig, model: Model, frontend: F, mut sampler: Sampler) -> Result<Self> {
        check_config(&cfg)?;
        if !model.is_initialized() {
            return Err(GenieError::NotInitialized);
        }
        if model.config() != &cfg.model_cfg {
            return Err(GenieError::InvalidConfig(format!(
                "model was not built for `{}`",
                cfg.key
            )));
        }
        let mode = initial_mode(&model, &cfg, &mut sampler)?;
        let mut genie = Self {
            params: cfg.default_user_parameters,
            cfg,
            model,
            sampler,
            mode,
            keys: Keys {
                frontend,
                button_to_note: BTreeMap::new(),
                sustain_down: false,
                sustained: BTreeSet::new(),
                soft_down: false,
            },
        };
        genie.redraw();
        log::info!(
            "session started with `{}` ({} mode)",
            genie.cfg.key,
            if genie.is_look_ahead() { "look-ahead" } else { "extempore" }
        );
        Ok(genie)
    }

    pub fn config(&self) -> &GenieConfig {
        &self.cfg
    }

    pub fn num_buttons(&self) -> usize {
        self.cfg.model_cfg.num_buttons()
    }

    pub fn is_look_ahead(&self) -> bool {
        matches!(self.mode, Mode::LookAhead(_))
    }

    /// Batch size of the live recurrent state.
    pub fn state_batch_size(&self) -> usize {
        match &self.mode {
            Mode::LookAhead(la) => la.state.batch_size(),
            Mode::Extempore(ex) => ex.state.batch_size(),
        }
    }

    /// Precomputed output class per button, in look-ahead mode.
    pub fn look_ahead_preds(&self) -> Option<&[usize]> {
        match &self.mode {
            Mode::LookAhead(la) => Some(&la.preds),
            Mode::Extempore(_) => None,
        }
    }

    pub fn user_parameters(&self) -> UserParameters {
        self.params
    }

    /// Takes effect from the next press. The look-ahead flag is recorded
    /// but the mode only follows the configuration on reset or model change.
    pub fn set_user_parameters(&mut self, params: UserParameters) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn frontend(&self) -> &F {
        &self.keys.frontend
    }

    pub fn frontend_mut(&mut self) -> &mut F {
        &mut self.keys.frontend
    }

    pub fn held_notes(&self) -> &BTreeMap<usize, u8> {
        &self.keys.button_to_note
    }

    pub fn view(&self) -> PianoView {
        self.keys.view(self.look_ahead_preds().unwrap_or(&[]))
    }

    pub fn press(&mut self, button: usize) -> Result<u8> {
        self.press_at(button, Instant::now())
    }

    /// Presses `button` at time `now` and returns the MIDI note played.
    pub fn press_at(&mut self, button: usize, now: Instant) -> Result<u8> {
        let num_buttons = self.num_buttons();
        if button >= num_buttons {
            return Err(GenieError::InvalidButton {
                button,
                num_buttons,
            });
        }

        match &mut self.mode {
            Mode::LookAhead(la) => {
                let output = la.preds[button];
                let note = self.keys.play(button, output);
                self.keys.redraw(&[]);

                let copied = la.state.copy_item_to_batch(button, num_buttons)?;
                *la = look_ahead(
                    &self.model,
                    &mut self.sampler,
                    &self.params,
                    &copied,
                    output as i32,
                )?;
                self.keys.redraw(&la.preds);
                log::debug!("button {button} -> note {note}, look-ahead {:?}", la.preds);
                Ok(note)
            }
            Mode::Extempore(ex) => {
                let delta = ex
                    .last_press
                    .map_or(NO_PREVIOUS_PRESS, |last| now.saturating_duration_since(last))
                    .as_secs_f32();
                let (state, logits) = self.model.evaluate(
                    &ex.state,
                    &[button],
                    Some(&[ex.last_output]),
                    Some(&[delta]),
                )?;

                let params = self.params;
                let representative = state.representative();
                let preds = match params.sampling_type {
                    SamplingType::Greedy => self.sampler.greedy(&logits),
                    SamplingType::Categorical => self
                        .sampler
                        .categorical(&logits, params.categorical_temperature),
                    SamplingType::ButtonUnigram => self.sampler.button_unigram(
                        &logits,
                        &ex.button_cache,
                        &[button],
                        params.categorical_temperature,
                        params.cache_lambda,
                    )?,
                    SamplingType::NeuralCache => self.sampler.neural_cache(
                        &logits,
                        &ex.neural_cache,
                        representative,
                        params.categorical_temperature,
                        params.cache_lambda,
                        params.neural_cache_theta,
                    )?,
                };

                let output = preds[0];
                let note = self.keys.play(button, output);
                self.keys.redraw(&[]);

                ex.neural_cache.push((representative.clone(), preds));
                ex.button_cache.push((button, output));
                ex.state = state;
                ex.last_output = output as i32;
                ex.last_press = Some(now);
                log::debug!("button {button} -> note {note} after {delta:.3}s");
                Ok(note)
            }
        }
    }

    /// Releases `button`; returns the note it was holding.
    pub fn release(&mut self, button: usize) -> Option<u8> {
        let note = self.keys.release(button);
        self.redraw();
        note
    }

    pub fn set_sustain(&mut self, down: bool) {
        self.keys.set_sustain(down);
    }

    pub fn set_soft(&mut self, down: bool) {
        self.keys.soft_down = down;
    }

    /// Keyboard press. Returns the note played, if the key pressed a button
    /// that was not already held.
    pub fn key_down(&mut self, key: char) -> Result<Option<u8>> {
        match map_key(key, self.num_buttons()) {
            Some(KeyAction::Button(button)) if !self.keys.button_to_note.contains_key(&button) => {
                self.press(button).map(Some)
            }
            Some(KeyAction::Sustain) => {
                self.set_sustain(true);
                Ok(None)
            }
            Some(KeyAction::Soft) => {
                self.set_soft(true);
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    pub fn key_up(&mut self, key: char) -> Option<u8> {
        match map_key(key, self.num_buttons())? {
            KeyAction::Button(button) => self.release(button),
            KeyAction::Sustain => {
                self.set_sustain(false);
                None
            }
            KeyAction::Soft => {
                self.set_soft(false);
                None
            }
        }
    }

    /// Forgets the performance so far and starts again from a zero state.
    pub fn reset(&mut self) -> Result<()> {
        self.keys.clear_held();
        self.redraw();
        self.mode = initial_mode(&self.model, &self.cfg, &mut self.sampler)?;
        self.redraw();
        log::info!("session reset");
        Ok(())
    }

    /// Switches to `cfg`, fetching its checkpoint from `cfg.uri`.
    pub async fn change_model(&mut self, cfg: &GenieConfig) -> Result<()> {
        self.change_model_with_weights(cfg, None).await
    }

    /// Switches to `cfg`. Nothing changes until the new model is fully
    /// initialized; on failure the current session stays as it was.
    pub async fn change_model_with_weights(
        &mut self,
        cfg: &GenieConfig,
        weights: Option<Weights>,
    ) -> Result<()> {
        check_config(cfg)?;
        self.keys.frontend.set_loading();

        let prepared = async {
            let mut model = Model::new(cfg.model_cfg.clone());
            model.initialize(Some(&cfg.uri), weights).await?;
            let mode = initial_mode(&model, cfg, &mut self.sampler)?;
            Ok::<_, GenieError>((model, mode))
        }
        .await;
        let (model, mode) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                log::warn!("failed to switch to `{}`: {err}", cfg.key);
                self.keys.frontend.set_ready();
                return Err(err);
            }
        };

        let old_mode = std::mem::replace(&mut self.mode, mode);
        let old_model = std::mem::replace(&mut self.model, model);
        self.cfg = cfg.clone();
        self.params = cfg.default_user_parameters;
        drop(old_mode);
        drop(old_model);

        self.keys.clear_held();
        self.redraw();
        self.keys.frontend.set_ready();
        log::info!("switched to `{}`", self.cfg.key);
        Ok(())
    }

    fn redraw(&mut self) {
        match &self.mode {
            Mode::LookAhead(la) => self.keys.redraw(&la.preds),
            Mode::Extempore(_) => self.keys.redraw(&[]),
        }
    }
}
