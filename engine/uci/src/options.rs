//! The UCI options registry.
//!
//! Every option the engine advertises, with defaults and clamped ranges.
//! Spins clamp on assignment; float-valued search parameters travel as
//! string options (UCI has no float type) and fall back to their default
//! when unparseable.

use mcts::SearchParams;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("unknown option \"{0}\"")]
    Unknown(String),

    #[error("bad value \"{value}\" for option \"{name}\"")]
    BadValue { name: String, value: String },
}

/// Canonical option names.
pub mod names {
    pub const THREADS: &str = "Threads";
    pub const NN_CACHE_SIZE: &str = "NNCacheSize";
    pub const MINIBATCH_SIZE: &str = "MinibatchSize";
    pub const MAX_COLLISION_EVENTS: &str = "MaxCollisionEvents";
    pub const CPUCT: &str = "CPuct";
    pub const CPUCT_BASE: &str = "CPuctBase";
    pub const FPU_REDUCTION: &str = "FpuReduction";
    pub const POLICY_TEMPERATURE: &str = "PolicyTemperature";
    pub const TEMPERATURE: &str = "Temperature";
    pub const SMART_PRUNING_FACTOR: &str = "SmartPruningFactor";
    pub const KLD_GAIN: &str = "MinimumKLDGainPerNode";
    pub const MOVE_OVERHEAD: &str = "MoveOverheadMs";
    pub const SLOWMOVER: &str = "Slowmover";
    pub const SYZYGY_PATH: &str = "SyzygyPath";
    pub const CHESS960: &str = "UCI_Chess960";
    pub const PONDER: &str = "Ponder";
    pub const LOG_FILE: &str = "LogFile";
    pub const BACKEND: &str = "Backend";
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Check(bool),
    Spin(i64),
    Str(String),
}

#[derive(Debug, Clone)]
enum OptionKind {
    Check { default: bool },
    Spin { default: i64, min: i64, max: i64 },
    Str { default: &'static str },
}

#[derive(Debug, Clone)]
struct OptionDef {
    name: &'static str,
    kind: OptionKind,
}

/// The registry: definitions plus current values.
pub struct Options {
    defs: Vec<OptionDef>,
    values: HashMap<String, OptionValue>,
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl Options {
    pub fn new() -> Self {
        use names::*;
        let defs = vec![
            spin(THREADS, 2, 1, 128),
            spin(NN_CACHE_SIZE, 200_000, 0, 999_999_999),
            spin(MINIBATCH_SIZE, 32, 1, 1024),
            spin(MAX_COLLISION_EVENTS, 32, 1, 65_536),
            string(CPUCT, "1.745"),
            string(CPUCT_BASE, "38739.0"),
            string(FPU_REDUCTION, "0.33"),
            string(POLICY_TEMPERATURE, "1.359"),
            string(TEMPERATURE, "0.0"),
            string(SMART_PRUNING_FACTOR, "1.33"),
            string(KLD_GAIN, "0.0"),
            spin(MOVE_OVERHEAD, 100, 0, 100_000),
            string(SLOWMOVER, "1.0"),
            string(SYZYGY_PATH, ""),
            check(CHESS960, false),
            // Advertised so GUIs enable pondering; the engine itself
            // ignores the value.
            check(PONDER, true),
            string(LOG_FILE, ""),
            string(BACKEND, "material"),
        ];
        let values = defs
            .iter()
            .map(|def| {
                let value = match &def.kind {
                    OptionKind::Check { default } => OptionValue::Check(*default),
                    OptionKind::Spin { default, .. } => OptionValue::Spin(*default),
                    OptionKind::Str { default } => OptionValue::Str(default.to_string()),
                };
                (def.name.to_ascii_lowercase(), value)
            })
            .collect();
        Self { defs, values }
    }

    /// Assign an option by (case-insensitive) name. Spins clamp to their
    /// range; checks accept `true`/`false`.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), OptionsError> {
        let key = name.to_ascii_lowercase();
        let def = self
            .defs
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| OptionsError::Unknown(name.to_string()))?;
        let parsed = match &def.kind {
            OptionKind::Check { .. } => match value.to_ascii_lowercase().as_str() {
                "true" => OptionValue::Check(true),
                "false" => OptionValue::Check(false),
                _ => {
                    return Err(OptionsError::BadValue {
                        name: name.to_string(),
                        value: value.to_string(),
                    })
                }
            },
            OptionKind::Spin { min, max, .. } => {
                let v: i64 = value.trim().parse().map_err(|_| OptionsError::BadValue {
                    name: name.to_string(),
                    value: value.to_string(),
                })?;
                OptionValue::Spin(v.clamp(*min, *max))
            }
            OptionKind::Str { .. } => OptionValue::Str(value.to_string()),
        };
        self.values.insert(key, parsed);
        Ok(())
    }

    pub fn get_bool(&self, name: &str) -> bool {
        match self.values.get(&name.to_ascii_lowercase()) {
            Some(OptionValue::Check(b)) => *b,
            _ => false,
        }
    }

    pub fn get_int(&self, name: &str) -> i64 {
        match self.values.get(&name.to_ascii_lowercase()) {
            Some(OptionValue::Spin(v)) => *v,
            _ => 0,
        }
    }

    pub fn get_str(&self, name: &str) -> String {
        match self.values.get(&name.to_ascii_lowercase()) {
            Some(OptionValue::Str(s)) => s.clone(),
            _ => String::new(),
        }
    }

    fn get_float(&self, name: &str, fallback: f32) -> f32 {
        let raw = self.get_str(name);
        raw.trim().parse().unwrap_or_else(|_| {
            warn!(option = name, value = raw, "unparseable float option, using default");
            fallback
        })
    }

    /// `option name ...` descriptor lines for the `uci` handshake, in
    /// registration order.
    pub fn uci_option_lines(&self) -> Vec<String> {
        self.defs
            .iter()
            .map(|def| match &def.kind {
                OptionKind::Check { default } => format!(
                    "option name {} type check default {}",
                    def.name, default
                ),
                OptionKind::Spin { default, min, max } => format!(
                    "option name {} type spin default {} min {} max {}",
                    def.name, default, min, max
                ),
                OptionKind::Str { default } => {
                    let default = if default.is_empty() {
                        "<empty>"
                    } else {
                        default
                    };
                    format!("option name {} type string default {}", def.name, default)
                }
            })
            .collect()
    }

    /// Snapshot the search parameters from the current option values.
    pub fn search_params(&self) -> SearchParams {
        let defaults = SearchParams::default();
        SearchParams {
            cpuct_init: self.get_float(names::CPUCT, defaults.cpuct_init),
            cpuct_base: self.get_float(names::CPUCT_BASE, defaults.cpuct_base),
            fpu_reduction: self.get_float(names::FPU_REDUCTION, defaults.fpu_reduction),
            policy_softmax_temp: self
                .get_float(names::POLICY_TEMPERATURE, defaults.policy_softmax_temp),
            temperature: self.get_float(names::TEMPERATURE, defaults.temperature),
            minibatch_size: self.get_int(names::MINIBATCH_SIZE) as usize,
            max_collision_events: self.get_int(names::MAX_COLLISION_EVENTS) as u32,
            smart_pruning_factor: self
                .get_float(names::SMART_PRUNING_FACTOR, defaults.smart_pruning_factor),
            kld_gain_threshold: self.get_float(names::KLD_GAIN, defaults.kld_gain_threshold),
            move_overhead_ms: self.get_int(names::MOVE_OVERHEAD),
            slowmover: self.get_float(names::SLOWMOVER, defaults.slowmover),
            threads: self.get_int(names::THREADS) as usize,
        }
        .clamped()
    }
}

fn spin(name: &'static str, default: i64, min: i64, max: i64) -> OptionDef {
    OptionDef {
        name,
        kind: OptionKind::Spin { default, min, max },
    }
}

fn check(name: &'static str, default: bool) -> OptionDef {
    OptionDef {
        name,
        kind: OptionKind::Check { default },
    }
}

fn string(name: &'static str, default: &'static str) -> OptionDef {
    OptionDef {
        name,
        kind: OptionKind::Str { default },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_registered() {
        let options = Options::new();
        assert_eq!(options.get_int(names::THREADS), 2);
        assert_eq!(options.get_int(names::NN_CACHE_SIZE), 200_000);
        assert!(!options.get_bool(names::CHESS960));
        assert!(options.get_bool(names::PONDER));
        assert_eq!(options.get_str(names::BACKEND), "material");
    }

    #[test]
    fn names_are_case_insensitive() {
        let mut options = Options::new();
        options.set("threads", "8").unwrap();
        assert_eq!(options.get_int(names::THREADS), 8);
        options.set("uci_chess960", "true").unwrap();
        assert!(options.get_bool(names::CHESS960));
    }

    #[test]
    fn spins_clamp_to_their_range() {
        let mut options = Options::new();
        options.set(names::THREADS, "4096").unwrap();
        assert_eq!(options.get_int(names::THREADS), 128);
        options.set(names::THREADS, "0").unwrap();
        assert_eq!(options.get_int(names::THREADS), 1);
    }

    #[test]
    fn unknown_option_is_an_error() {
        let mut options = Options::new();
        assert!(matches!(
            options.set("Hash", "64"),
            Err(OptionsError::Unknown(_))
        ));
    }

    #[test]
    fn bad_values_are_errors() {
        let mut options = Options::new();
        assert!(options.set(names::THREADS, "many").is_err());
        assert!(options.set(names::CHESS960, "maybe").is_err());
    }

    #[test]
    fn descriptor_lines_cover_every_option() {
        let options = Options::new();
        let lines = options.uci_option_lines();
        assert!(lines
            .iter()
            .any(|l| l == "option name Threads type spin default 2 min 1 max 128"));
        assert!(lines
            .iter()
            .any(|l| l == "option name UCI_Chess960 type check default false"));
        assert!(lines
            .iter()
            .any(|l| l == "option name SyzygyPath type string default <empty>"));
        assert_eq!(lines.len(), 18);
    }

    #[test]
    fn search_params_reflect_options() {
        let mut options = Options::new();
        options.set(names::CPUCT, "2.5").unwrap();
        options.set(names::MINIBATCH_SIZE, "8").unwrap();
        let params = options.search_params();
        assert!((params.cpuct_init - 2.5).abs() < 1e-6);
        assert_eq!(params.minibatch_size, 8);
    }

    #[test]
    fn unparseable_float_falls_back_to_default() {
        let mut options = Options::new();
        options.set(names::CPUCT, "not-a-number").unwrap();
        let params = options.search_params();
        assert!((params.cpuct_init - 1.745).abs() < 1e-6);
    }
}
