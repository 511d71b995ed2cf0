//! TOML configuration loader (C11, §10.3/§6): parses the hierarchical config
//! file into a station list plus the link-model variant, validating the
//! "exactly one of links/error_probs/path_loss" precedence rule. Grounded on
//! `control/config.rs::ControlConfig::load`'s read-then-`toml::from_str`
//! pattern, generalized to typed `ConfigError` variants instead of `String`.

use std::path::Path;

use serde::Deserialize;

use crate::engine::link::{LinkModel, Matrix};
use crate::engine::path_loss::{self, LogDistanceParams};
use crate::engine::station::StationRegistry;
use crate::error::ConfigError;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub ifaces: IfacesConfig,
    pub path_loss: Option<PathLossConfig>,
    /// Dotted filter rule strings (§4.9), e.g. `"aa:bb:cc:dd:ee:ff.commit.2"`.
    /// The original takes these from a `-F` flag not present in the retained
    /// CLI excerpt; this crate reads them from the config file instead.
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct IfacesConfig {
    pub ids: Vec<String>,
    pub links: Option<Vec<(usize, usize, i32)>>,
    pub error_probs: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Deserialize)]
pub struct PathLossConfig {
    pub positions: Vec<(f64, f64)>,
    pub tx_powers: Vec<f64>,
    /// `["log_distance", exponent, x_g]`, the original's 3-element tuple form.
    pub model_params: (String, f64, f64),
}

/// The parsed, validated configuration ready to build an `Engine` from.
pub struct LoadedConfig {
    pub stations: StationRegistry,
    pub link_model: LinkModel,
    pub filters: Vec<crate::engine::filter::FrameFilter>,
}

fn parse_mac(s: &str) -> Result<[u8; 6], ConfigError> {
    let mut out = [0u8; 6];
    let mut parts = s.split(':');
    for byte in out.iter_mut() {
        let part = parts.next().ok_or_else(|| ConfigError::InvalidMac(s.to_string()))?;
        *byte = u8::from_str_radix(part, 16).map_err(|_| ConfigError::InvalidMac(s.to_string()))?;
    }
    if parts.next().is_some() {
        return Err(ConfigError::InvalidMac(s.to_string()));
    }
    Ok(out)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds the station registry and link model per §4.2's mutually
    /// exclusive precedence: explicit links, `error_probs`, `path_loss`, or
    /// the constant default if none is given.
    pub fn into_loaded(self) -> Result<LoadedConfig, ConfigError> {
        let n = self.ifaces.ids.len();
        let mut stations = StationRegistry::new();
        for id in &self.ifaces.ids {
            let mac = parse_mac(id)?;
            stations.add(mac, 15.0, (0.0, 0.0));
        }

        let sources = [self.ifaces.links.is_some(), self.ifaces.error_probs.is_some(), self.path_loss.is_some()];
        if sources.iter().filter(|&&s| s).count() > 1 {
            return Err(ConfigError::AmbiguousLinkModel);
        }

        let link_model = if let Some(links) = &self.ifaces.links {
            let mut snr = Matrix::filled(n, 0i32);
            for (i, j, db) in links {
                snr.set(*i, *j, *db);
                snr.set(*j, *i, *db);
            }
            LinkModel::SnrMatrix(snr)
        } else if let Some(error_probs) = &self.ifaces.error_probs {
            if error_probs.len() != n {
                return Err(ConfigError::ErrorProbDimensionMismatch {
                    rows: error_probs.len(),
                    expected: n,
                });
            }
            let mut errp = Matrix::filled(n, 0.0f64);
            for (i, row) in error_probs.iter().enumerate() {
                if row.len() != n {
                    return Err(ConfigError::ErrorProbDimensionMismatch { rows: row.len(), expected: n });
                }
                for (j, value) in row.iter().enumerate() {
                    errp.set(i, j, *value);
                    errp.set(j, i, *value);
                }
            }
            LinkModel::ErrProbMatrix(errp)
        } else if let Some(pl) = &self.path_loss {
            if pl.positions.len() != n || pl.tx_powers.len() != n {
                return Err(ConfigError::PathLossDimensionMismatch { expected: n });
            }
            if pl.model_params.0 != "log_distance" {
                return Err(ConfigError::UnknownPathLossModel(pl.model_params.0.clone()));
            }
            let params = LogDistanceParams {
                path_loss_exponent: pl.model_params.1,
                x_g: pl.model_params.2,
            };
            LinkModel::SnrMatrix(path_loss::derive_snr_matrix(&pl.positions, &pl.tx_powers, params))
        } else {
            LinkModel::Default
        };

        let filters = self
            .filters
            .iter()
            .map(|rule| crate::engine::filter::FrameFilter::parse(rule).ok_or_else(|| ConfigError::InvalidFilter(rule.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LoadedConfig { stations, link_model, filters })
    }
}
