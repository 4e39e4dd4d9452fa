//! Bundle topology model and verifier.
//!
//! A bundle describes a multi-service deployment: which charms to deploy,
//! how many units of each, where those units should be placed, and which
//! services relate to each other. [`read_bundle_data`] decodes the YAML
//! text format into [`BundleData`] without checking it, and
//! [`read_bundle_dir`] / [`read_bundle_archive`] read a bundle plus its
//! mandatory README from disk;
//! [`BundleData::verify`] then validates the whole topology in one pass,
//! collecting every violation rather than stopping at the first, so that a
//! deployer gets a complete pre-flight report.
//!
//! Verification is pure: it reads the bundle and performs no I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml_bw as serde_yaml;
use thiserror::Error;

use crate::url::CharmRef;

/// Errors raised while decoding, reading, or parsing bundle text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BundleError {
    #[error("cannot unmarshal bundle data: {0}")]
    Unmarshal(String),
    #[error("cannot read bundle at {path}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("cannot read README file: {0}")]
    Readme(String),
    #[error("invalid placement syntax {0:?}")]
    MalformedPlacement(String),
    #[error("invalid relation syntax {0:?}")]
    MalformedRelation(String),
}

/// The contents of a bundle. Maps are ordered so that iteration, and
/// therefore verification error ordering, is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleData {
    /// One entry per service the bundle will create, keyed by service name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,

    /// Notional machines referred to by unit placements, keyed by machine
    /// id. Declaring a machine that no placement refers to is an error.
    #[serde(default)]
    pub machines: BTreeMap<String, Option<MachineSpec>>,

    /// Default series used when the bundle chooses charms.
    #[serde(default)]
    pub series: String,

    /// Two-element `service:relation` pairs; a relation is made between
    /// each pair.
    #[serde(default)]
    pub relations: Vec<Vec<String>>,
}

/// A single service deployed as part of a bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Identity of the charm to deploy for this service.
    #[serde(default)]
    pub charm: String,

    /// Number of units to deploy.
    #[serde(default)]
    pub num_units: i32,

    /// Up to `num_units` placement directives, one per unit, each matching
    /// `(<container>:)?(<service>(/<unit>)?|<machine>|new)`.
    #[serde(default)]
    pub to: Vec<String>,

    /// Configuration values applied to the new service.
    #[serde(default)]
    pub options: BTreeMap<String, serde_yaml::Value>,

    /// Annotations applied to the service when deployed.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Default constraints for new machines created for this service.
    #[serde(default)]
    pub constraints: String,
}

/// A notional machine mapped onto a real machine at deployment time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineSpec {
    #[serde(default)]
    pub constraints: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Decode bundle data from a reader. The result is not verified; call
/// [`BundleData::verify`] before acting on it.
pub fn read_bundle_data<R: Read>(reader: R) -> Result<BundleData, BundleError> {
    serde_yaml::from_reader(reader).map_err(|err| BundleError::Unmarshal(err.to_string()))
}

/// A bundle read from disk: its topology plus the human-readable README
/// that every published bundle must carry.
#[derive(Debug, Clone)]
pub struct Bundle {
    data: BundleData,
    readme: String,
    path: PathBuf,
}

impl Bundle {
    pub fn data(&self) -> &BundleData {
        &self.data
    }

    pub fn readme(&self) -> &str {
        &self.readme
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a bundle from an extracted directory holding `bundle.yaml` and a
/// `README.md`. A missing README is an error; bundles are published for
/// humans as much as for deployers.
pub fn read_bundle_dir(path: impl AsRef<Path>) -> Result<Bundle, BundleError> {
    let path = path.as_ref();
    let data_path = path.join("bundle.yaml");
    let file = fs::File::open(&data_path).map_err(|err| BundleError::Read {
        path: data_path.clone(),
        reason: err.to_string(),
    })?;
    let data = read_bundle_data(file)?;
    let readme = fs::read_to_string(path.join("README.md"))
        .map_err(|err| BundleError::Readme(err.to_string()))?;
    Ok(Bundle {
        data,
        readme,
        path: path.to_path_buf(),
    })
}

/// Read a bundle from a zip archive containing the same `bundle.yaml` and
/// `README.md` entries as an extracted bundle directory.
pub fn read_bundle_archive(path: impl AsRef<Path>) -> Result<Bundle, BundleError> {
    let path = path.as_ref();
    let read_err = |reason: String| BundleError::Read {
        path: path.to_path_buf(),
        reason,
    };
    let file = fs::File::open(path).map_err(|err| read_err(err.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| read_err(err.to_string()))?;

    let data = {
        let entry = archive
            .by_name("bundle.yaml")
            .map_err(|err| read_err(format!("bundle.yaml: {err}")))?;
        read_bundle_data(entry)?
    };
    let readme = {
        let mut entry = archive
            .by_name("README.md")
            .map_err(|err| BundleError::Readme(err.to_string()))?;
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|err| BundleError::Readme(err.to_string()))?;
        text
    };
    Ok(Bundle {
        data,
        readme,
        path: path.to_path_buf(),
    })
}

/// The aggregate of every violation found by [`BundleData::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationError {
    pub errors: Vec<String>,
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => f.write_str("no verification errors"),
            1 => f.write_str(&self.errors[0]),
            n => write!(f, "{} (and {} more errors)", self.errors[0], n - 1),
        }
    }
}

impl std::error::Error for VerificationError {}

/// A parsed unit placement directive. Exactly one of `machine` and
/// `service` is set; `machine` may also be the special value `"new"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitPlacement {
    /// Container type the unit is deployed into, if any.
    pub container_type: Option<String>,
    /// Numeric machine id or `"new"`.
    pub machine: Option<String>,
    /// Target service name.
    pub service: Option<String>,
    /// Unit index within the target service.
    pub unit: Option<u32>,
}

/// Parse one placement directive from a service's `to` clause.
///
/// Grammar: `(<container>:)?(<service>(/<unit>)?|<machine-number>|new)`.
/// A target that parses as the service name `"new"` means "place on a
/// brand-new machine"; combining it with a unit index is malformed.
pub fn parse_placement(p: &str) -> Result<UnitPlacement, BundleError> {
    let malformed = || BundleError::MalformedPlacement(p.to_string());

    let (container_type, target) = match p.split_once(':') {
        Some((container, rest)) => {
            if !is_container_type(container) {
                return Err(malformed());
            }
            (Some(container.to_string()), rest)
        }
        None => (None, p),
    };

    if is_machine_id(target) {
        return Ok(UnitPlacement {
            container_type,
            machine: Some(target.to_string()),
            ..UnitPlacement::default()
        });
    }

    let (service, unit) = match target.split_once('/') {
        Some((service, unit_str)) => {
            if !is_machine_id(unit_str) {
                return Err(malformed());
            }
            let unit: u32 = unit_str.parse().map_err(|_| malformed())?;
            (service, Some(unit))
        }
        None => (target, None),
    };
    if !is_service_name(service) {
        return Err(malformed());
    }

    if service == "new" {
        if unit.is_some() {
            return Err(malformed());
        }
        return Ok(UnitPlacement {
            container_type,
            machine: Some("new".to_string()),
            ..UnitPlacement::default()
        });
    }

    Ok(UnitPlacement {
        container_type,
        service: Some(service.to_string()),
        unit,
        ..UnitPlacement::default()
    })
}

/// Parse one `service:relation` endpoint.
pub fn parse_relation(endpoint: &str) -> Result<(&str, &str), BundleError> {
    if let Some((service, relation)) = endpoint.split_once(':') {
        if is_service_name(service) && is_relation_name(relation) {
            return Ok((service, relation));
        }
    }
    Err(BundleError::MalformedRelation(endpoint.to_string()))
}

impl BundleData {
    /// Verify that the bundle is internally consistent:
    ///
    /// - every relation is a two-element pair of distinct, existing services;
    /// - every service's charm identity parses, its constraints pass
    ///   `verify_constraints`, and its placements are valid;
    /// - every machine id is numeric and its constraints pass;
    /// - every declared machine is referred to by at least one placement.
    ///
    /// All violations are collected; on failure the returned
    /// [`VerificationError`] holds every one of them.
    pub fn verify<F>(&self, verify_constraints: F) -> Result<(), VerificationError>
    where
        F: Fn(&str) -> Result<(), String>,
    {
        let mut verifier = Verifier {
            bundle: self,
            machine_ref_counts: self.machines.keys().map(|id| (id.clone(), 0)).collect(),
            errors: Vec::new(),
            verify_constraints: &verify_constraints,
        };
        verifier.verify_relations();
        verifier.verify_services();
        verifier.verify_machines();
        verifier.report_unreferenced_machines();

        if verifier.errors.is_empty() {
            Ok(())
        } else {
            Err(VerificationError {
                errors: verifier.errors,
            })
        }
    }
}

struct Verifier<'a> {
    bundle: &'a BundleData,
    machine_ref_counts: BTreeMap<String, usize>,
    errors: Vec<String>,
    verify_constraints: &'a dyn Fn(&str) -> Result<(), String>,
}

impl Verifier<'_> {
    fn add_error(&mut self, err: impl Into<String>) {
        self.errors.push(err.into());
    }

    fn verify_relations(&mut self) {
        let bundle = self.bundle;
        for (index, pair) in bundle.relations.iter().enumerate() {
            if pair.len() != 2 {
                self.add_error(format!(
                    "relation {index} has {} endpoints, not 2",
                    pair.len()
                ));
            }
            let mut services = Vec::with_capacity(2);
            for endpoint in pair {
                let service = match parse_relation(endpoint) {
                    Ok((service, _)) => service,
                    Err(err) => {
                        self.add_error(err.to_string());
                        continue;
                    }
                };
                if !bundle.services.contains_key(service) {
                    self.add_error(format!(
                        "service {service:?} not defined (referred to by relation {})",
                        relation_label(pair)
                    ));
                }
                services.push(service);
            }
            if let [first, second] = services.as_slice() {
                if first == second {
                    self.add_error(format!(
                        "relation {} relates a service to itself",
                        relation_label(pair)
                    ));
                }
            }
        }
    }

    fn verify_services(&mut self) {
        let bundle = self.bundle;
        for (name, service) in &bundle.services {
            if service.num_units < 0 {
                self.add_error(format!(
                    "negative number of units specified on service {name:?}"
                ));
            }
            if let Err(err) = CharmRef::parse(&service.charm) {
                self.add_error(format!("invalid charm URL in service {name:?}: {err}"));
            }
            if let Err(reason) = (self.verify_constraints)(&service.constraints) {
                self.add_error(format!("invalid constraints in service {name:?}: {reason}"));
            }
            if service.to.len() as i64 > service.num_units as i64 {
                self.add_error(format!(
                    "too many units specified in unit placement for service {name:?}"
                ));
            }
            self.verify_placements(&service.to);
        }
    }

    fn verify_placements(&mut self, to: &[String]) {
        let bundle = self.bundle;
        for p in to {
            let placement = match parse_placement(p) {
                Ok(placement) => placement,
                Err(err) => {
                    self.add_error(err.to_string());
                    continue;
                }
            };
            if let Some(service) = &placement.service {
                let Some(spec) = bundle.services.get(service) else {
                    self.add_error(format!("placement {p:?} refers to non-existent service"));
                    continue;
                };
                // Preserved upstream bound: the last legitimate unit index
                // is also rejected here.
                if let Some(unit) = placement.unit {
                    if unit as i64 >= spec.num_units as i64 - 1 {
                        self.add_error(format!(
                            "placement {p:?} specifies a unit greater than the {} unit(s) \
                             started by the target service",
                            spec.num_units
                        ));
                    }
                }
            } else if let Some(machine) = &placement.machine {
                if machine == "new" {
                    continue;
                }
                match self.machine_ref_counts.get_mut(machine) {
                    Some(count) => *count += 1,
                    None => {
                        self.add_error(format!("placement {p:?} refers to non-existent machine"));
                    }
                }
            }
        }
    }

    fn verify_machines(&mut self) {
        let bundle = self.bundle;
        for (id, machine) in &bundle.machines {
            if !is_machine_id(id) {
                self.add_error(format!("invalid machine id {id:?} found in machines"));
            }
            let constraints = machine
                .as_ref()
                .map(|m| m.constraints.as_str())
                .unwrap_or_default();
            if let Err(reason) = (self.verify_constraints)(constraints) {
                self.add_error(format!("invalid constraints in machine {id:?}: {reason}"));
            }
        }
    }

    fn report_unreferenced_machines(&mut self) {
        let unreferenced: Vec<String> = self
            .machine_ref_counts
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| id.clone())
            .collect();
        for id in unreferenced {
            self.add_error(format!(
                "machine {id:?} is not referred to by a placement directive"
            ));
        }
    }
}

fn relation_label(pair: &[String]) -> String {
    format!("[{}]", pair.join(", "))
}

/// Machine ids (and unit indices) are decimal numbers with no leading zero.
fn is_machine_id(s: &str) -> bool {
    match s.as_bytes() {
        [] => false,
        [b'0'] => true,
        [b'0', ..] => false,
        bytes => bytes.iter().all(|b| b.is_ascii_digit()),
    }
}

fn is_container_type(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_lowercase())
}

/// Service names: dash-separated lowercase words, each segment after the
/// first containing at least one letter.
fn is_service_name(s: &str) -> bool {
    let mut segments = s.split('-');
    match segments.next() {
        Some(first)
            if first.starts_with(|c: char| c.is_ascii_lowercase())
                && first.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) => {}
        _ => return false,
    }
    segments.all(|seg| {
        !seg.is_empty()
            && seg.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            && seg.bytes().any(|b| b.is_ascii_lowercase())
    })
}

/// Relation names: lowercase words joined by `-` or `_`.
fn is_relation_name(s: &str) -> bool {
    let mut segments = s.split(['-', '_']);
    match segments.next() {
        Some(first)
            if first.starts_with(|c: char| c.is_ascii_lowercase())
                && first.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) => {}
        _ => return false,
    }
    segments.all(|seg| {
        !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    })
}
