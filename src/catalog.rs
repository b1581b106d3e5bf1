//! Run description: grid, decomposition and the fluid diagnostics of a run.
//!
//! The description is a small XML document,
//!
//! ```xml
//! <FLUIDRUN>
//!   <PARAMETER name="indx">5</PARAMETER>
//!   <PARAMETER name="indy">5</PARAMETER>
//!   <PARAMETER name="indz">4</PARAMETER>
//!   <PARAMETER name="nvpy">4</PARAMETER>
//!   <PARAMETER name="nvpz">2</PARAMETER>
//!   <PARAMETER name="ndim">3</PARAMETER>
//!   <PARAMETER name="dt">0.1</PARAMETER>
//!   <DIAGNOSTIC species="electron" nts="5" npro="2" nprd="4" nrec="32">fme3.1</DIAGNOSTIC>
//! </FLUIDRUN>
//! ```
//!
//! `nrec` counts partition blocks, as written; `offset` (bytes before the
//! first record) and `byteorder` are optional. Stream paths are relative to
//! the description file.

use crate::error::{PartitionError, Result};
use crate::layout::{GlobalGridSpec, PartitionLayout, ProcessGrid, compute_layout};
use crate::record::MomentKind;
use crate::stream::{ByteOrder, MappedFile, PartitionStream, RecordClock, open_partitioned_stream};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Deserialize, Debug, Clone)]
pub struct Parameter {
    #[serde(rename = "name")]
    pub name: Option<String>,
    #[serde(rename = "$value")]
    pub value: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Diagnostic {
    #[serde(rename = "species")]
    pub species: Option<String>,
    #[serde(rename = "nts")]
    pub nts: Option<String>,
    #[serde(rename = "npro")]
    pub npro: Option<String>,
    #[serde(rename = "nprd")]
    pub nprd: Option<String>,
    #[serde(rename = "nrec")]
    pub nrec: Option<String>,
    #[serde(rename = "offset")]
    pub offset: Option<String>,
    #[serde(rename = "byteorder")]
    pub byteorder: Option<String>,
    #[serde(rename = "$value")]
    pub path: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct FluidRunRoot {
    #[serde(rename = "PARAMETER", default)]
    pub parameters: Vec<Parameter>,

    #[serde(rename = "DIAGNOSTIC", default)]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Species {
    Electron,
    Ion,
}

impl Species {
    pub const ALL: [Species; 2] = [Species::Electron, Species::Ion];

    pub fn label(self) -> &'static str {
        match self {
            Species::Electron => "ELECTRON",
            Species::Ion => "ION",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Species::Electron => "elect fluid moments",
            Species::Ion => "ion fluid moments",
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Species {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "electron" | "electrons" | "e" => Ok(Species::Electron),
            "ion" | "ions" | "i" => Ok(Species::Ion),
            other => Err(format!("unknown species '{other}', expected electron or ion")),
        }
    }
}

/// A fluid diagnostic stream and what it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticDescriptor {
    pub species: Species,
    /// Timesteps between records.
    pub nts: usize,
    /// Processing level; selects which moments are written.
    pub npro: u32,
    /// Components per record.
    pub nprd: usize,
    /// Partition blocks written to the stream.
    pub nrec: usize,
    /// Bytes preceding the first record.
    pub offset: usize,
    pub byte_order: ByteOrder,
    pub path: PathBuf,
}

fn parse_attr<T: FromStr>(value: Option<&str>, what: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    let raw = value.ok_or_else(|| PartitionError::invalid(format!("missing {what}")))?;
    raw.trim()
        .parse::<T>()
        .map_err(|e| PartitionError::invalid(format!("invalid {what} '{raw}': {e}")))
}

impl DiagnosticDescriptor {
    fn from_raw(raw: &Diagnostic, base_dir: Option<&Path>) -> Result<Self> {
        let species = parse_attr::<Species>(raw.species.as_deref(), "diagnostic species")?;
        let npro = parse_attr::<u32>(raw.npro.as_deref(), "npro")?;
        if !(1..=4).contains(&npro) {
            return Err(PartitionError::invalid(format!(
                "npro must be between 1 and 4, got {npro}"
            )));
        }
        let nprd = parse_attr::<usize>(raw.nprd.as_deref(), "nprd")?;
        if nprd == 0 {
            return Err(PartitionError::invalid("nprd must be positive"));
        }
        let path = raw
            .path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| PartitionError::invalid(format!("{species} diagnostic has no stream")))?;
        let path = match base_dir {
            Some(dir) if Path::new(path).is_relative() => dir.join(path),
            _ => PathBuf::from(path),
        };

        Ok(Self {
            species,
            nts: parse_attr(raw.nts.as_deref(), "nts")?,
            npro,
            nprd,
            nrec: parse_attr(raw.nrec.as_deref(), "nrec")?,
            offset: raw
                .offset
                .as_deref()
                .map(|o| parse_attr(Some(o), "offset"))
                .transpose()?
                .unwrap_or(0),
            byte_order: raw
                .byteorder
                .as_deref()
                .map(|o| parse_attr(Some(o), "byteorder"))
                .transpose()?
                .unwrap_or_default(),
            path,
        })
    }

    /// Moments present in each record, in storage order.
    pub fn moments(&self, ndim: usize) -> Vec<MomentKind> {
        MomentKind::ALL
            .into_iter()
            .filter(|k| k.min_processing_level() <= self.npro)
            .filter(|k| k.component_range(ndim).end <= self.nprd)
            .collect()
    }

    pub fn complete_records(&self, layout: &PartitionLayout) -> usize {
        layout.complete_records(self.nrec)
    }

    /// Opens the stream positioned at its first record, limited to the
    /// complete records the run wrote.
    pub fn open(&self, layout: &PartitionLayout) -> Result<PartitionStream<MappedFile>> {
        Ok(open_partitioned_stream(&self.path, self.offset)?
            .with_byte_order(self.byte_order)
            .with_record_limit(self.complete_records(layout)))
    }
}

/// Everything needed to read the fluid diagnostics of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub grid: GlobalGridSpec,
    pub processes: ProcessGrid,
    pub ndim: usize,
    pub dt: f64,
    pub diagnostics: Vec<DiagnosticDescriptor>,
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path)?;
        Self::from_xml_str(&xml, path.parent())
    }

    /// Parses a description; relative stream paths are joined to `base_dir`.
    pub fn from_xml_str(xml: &str, base_dir: Option<&Path>) -> Result<Self> {
        let root: FluidRunRoot =
            serde_xml_rs::from_str(xml).map_err(|e| PartitionError::Catalog(e.to_string()))?;

        let params = root
            .parameters
            .iter()
            .filter_map(|p| p.name.clone().map(|n| (n.trim().to_string(), p.value.clone())))
            .collect::<HashMap<_, _>>();
        let param = |name: &str| params.get(name).and_then(|v| v.as_deref());

        let grid = GlobalGridSpec::from_log2(
            parse_attr(param("indx"), "parameter indx")?,
            parse_attr(param("indy"), "parameter indy")?,
            parse_attr(param("indz"), "parameter indz")?,
        )?;
        let processes = ProcessGrid::new(
            parse_attr(param("nvpy"), "parameter nvpy")?,
            parse_attr(param("nvpz"), "parameter nvpz")?,
        );
        let ndim = match param("ndim") {
            Some(v) => parse_attr(Some(v), "parameter ndim")?,
            None => 3,
        };
        let dt: f64 = parse_attr(param("dt"), "parameter dt")?;

        let diagnostics = root
            .diagnostics
            .iter()
            .map(|d| DiagnosticDescriptor::from_raw(d, base_dir))
            .collect::<Result<Vec<_>>>()?;
        for (i, d) in diagnostics.iter().enumerate() {
            if diagnostics[..i].iter().any(|o| o.species == d.species) {
                return Err(PartitionError::invalid(format!(
                    "{} diagnostic listed more than once",
                    d.species
                )));
            }
        }

        Ok(Self {
            grid,
            processes,
            ndim,
            dt,
            diagnostics,
        })
    }

    pub fn layout(&self) -> Result<PartitionLayout> {
        compute_layout(self.grid, self.processes)
    }

    pub fn clock(&self, diagnostic: &DiagnosticDescriptor) -> RecordClock {
        RecordClock::new(self.dt, diagnostic.nts)
    }

    pub fn diagnostic(&self, species: Species) -> Option<&DiagnosticDescriptor> {
        self.diagnostics.iter().find(|d| d.species == species)
    }

    /// Picks the diagnostic to read. Without an explicit species the run must
    /// hold exactly one fluid diagnostic.
    pub fn select(&self, species: Option<Species>) -> Result<&DiagnosticDescriptor> {
        match (species, self.diagnostics.as_slice()) {
            (Some(s), _) => self
                .diagnostic(s)
                .ok_or_else(|| PartitionError::DiagnosticNotFound(s.description().to_string())),
            (None, []) => Err(PartitionError::DiagnosticNotFound(
                "no fluid diagnostic files found".to_string(),
            )),
            (None, [only]) => Ok(only),
            (None, many) => Err(PartitionError::DiagnosticNotFound(format!(
                "several fluid diagnostics available ({}), choose a species",
                many.iter()
                    .map(|d| d.species.description())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}
