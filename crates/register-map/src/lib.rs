use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod codec;
pub mod plan;

mod builtin;

pub use builtin::builtin;

/// The four Modbus address spaces a register can live in. Declaration order
/// doubles as the sort order for overlap checks and read planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Coil,
    DiscreteInput,
    Holding,
    Input,
}

impl Region {
    /// Bit regions are read one bool per address; word regions one u16.
    pub fn is_bit(self) -> bool {
        matches!(self, Region::Coil | Region::DiscreteInput)
    }

    /// Whether the Modbus protocol allows writes to this region at all.
    pub fn is_writable(self) -> bool {
        matches!(self, Region::Coil | Region::Holding)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Region::Coil => "coil",
            Region::DiscreteInput => "discrete_input",
            Region::Holding => "holding",
            Region::Input => "input",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "coil" => Ok(Region::Coil),
            "discrete_input" | "discrete" => Ok(Region::DiscreteInput),
            "holding" => Ok(Region::Holding),
            "input" => Ok(Region::Input),
            other => Err(CatalogError::InvalidRegion(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
}

impl DataType {
    /// Number of 16-bit registers the type occupies. Bit types occupy one
    /// coil/discrete input address.
    pub fn word_count(self) -> u16 {
        match self {
            DataType::Bool | DataType::Int16 | DataType::Uint16 => 1,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 2,
        }
    }

    pub fn is_bit(self) -> bool {
        matches!(self, DataType::Bool)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int16 => "int16",
            DataType::Uint16 => "uint16",
            DataType::Int32 => "int32",
            DataType::Uint32 => "uint32",
            DataType::Float32 => "float32",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "bool" => Ok(DataType::Bool),
            "int16" => Ok(DataType::Int16),
            "uint16" => Ok(DataType::Uint16),
            "int32" => Ok(DataType::Int32),
            "uint32" => Ok(DataType::Uint32),
            "float32" => Ok(DataType::Float32),
            other => Err(CatalogError::InvalidDataType(other.to_string())),
        }
    }
}

/// Byte order inside each 16-bit word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

/// Word order for 32-bit values spanning two registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordOrder {
    #[default]
    Big,
    Little,
}

impl FromStr for ByteOrder {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "big" => Ok(ByteOrder::Big),
            "little" => Ok(ByteOrder::Little),
            other => Err(CatalogError::InvalidOrder(other.to_string())),
        }
    }
}

impl FromStr for WordOrder {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "big" => Ok(WordOrder::Big),
            "little" => Ok(WordOrder::Little),
            other => Err(CatalogError::InvalidOrder(other.to_string())),
        }
    }
}

/// How multi-byte values are laid out on the device. The Qube ships big/big.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Encoding {
    pub byte_order: ByteOrder,
    pub word_order: WordOrder,
}

/// One entry of the register catalog. Created at load time, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDef {
    pub key: String,
    pub name: String,
    pub address: u16,
    pub region: Region,
    pub data_type: DataType,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    pub precision: Option<u8>,
    pub unit: Option<String>,
    pub writable: bool,
    pub cumulative: bool,
}

impl RegisterDef {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        address: u16,
        region: Region,
        data_type: DataType,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            address,
            region,
            data_type,
            scale: None,
            offset: None,
            precision: None,
            unit: None,
            writable: false,
            cumulative: false,
        }
    }

    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn offset(mut self, offset: f64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn precision(mut self, precision: u8) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn cumulative(mut self) -> Self {
        self.cumulative = true;
        self
    }

    /// Addresses occupied in the region, in words (or bits for bit regions).
    pub fn word_span(&self) -> u16 {
        if self.region.is_bit() {
            1
        } else {
            self.data_type.word_count()
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("register with empty key at address {0}")]
    EmptyKey(u16),
    #[error("duplicate register key {0}")]
    DuplicateKey(String),
    #[error("registers {first} and {second} overlap in the {region} region")]
    Overlap {
        region: Region,
        first: String,
        second: String,
    },
    #[error("register {0} spans past the end of the address space")]
    AddressOverflow(String),
    #[error("register {0} is marked writable but lives in a read-only region")]
    ReadOnlyRegion(String),
    #[error("register {0}: bit regions only carry bool values")]
    BitRegionType(String),
    #[error("register {0}: word regions cannot carry bool values")]
    WordRegionBool(String),
    #[error("register {0} is cumulative but not numeric")]
    CumulativeBool(String),
    #[error("register {0} has a zero scale")]
    ZeroScale(String),
    #[error("invalid region {0}")]
    InvalidRegion(String),
    #[error("invalid data type {0}")]
    InvalidDataType(String),
    #[error("invalid byte/word order {0}")]
    InvalidOrder(String),
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Validated, immutable register catalog for one device model.
#[derive(Debug, Clone)]
pub struct RegisterMap {
    defs: Vec<RegisterDef>,
    index: HashMap<String, usize>,
}

impl RegisterMap {
    pub fn new(defs: Vec<RegisterDef>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(defs.len());
        for (pos, def) in defs.iter().enumerate() {
            if def.key.is_empty() {
                return Err(CatalogError::EmptyKey(def.address));
            }
            if index.insert(def.key.clone(), pos).is_some() {
                return Err(CatalogError::DuplicateKey(def.key.clone()));
            }
            if def.writable && !def.region.is_writable() {
                return Err(CatalogError::ReadOnlyRegion(def.key.clone()));
            }
            if def.region.is_bit() && !def.data_type.is_bit() {
                return Err(CatalogError::BitRegionType(def.key.clone()));
            }
            if !def.region.is_bit() && def.data_type.is_bit() {
                return Err(CatalogError::WordRegionBool(def.key.clone()));
            }
            if def.cumulative && def.data_type.is_bit() {
                return Err(CatalogError::CumulativeBool(def.key.clone()));
            }
            if def.scale == Some(0.0) {
                return Err(CatalogError::ZeroScale(def.key.clone()));
            }
            if def.address.checked_add(def.word_span() - 1).is_none() {
                return Err(CatalogError::AddressOverflow(def.key.clone()));
            }
        }

        check_overlaps(&defs)?;

        Ok(Self { defs, index })
    }

    pub fn get(&self, key: &str) -> Option<&RegisterDef> {
        self.index.get(key).map(|&pos| &self.defs[pos])
    }

    /// Find the def whose span covers (region, address).
    pub fn find_by_address(&self, region: Region, address: u16) -> Option<&RegisterDef> {
        self.defs.iter().find(|def| {
            def.region == region
                && address >= def.address
                && u32::from(address) < u32::from(def.address) + u32::from(def.word_span())
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDef> {
        self.defs.iter()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn count_in_region(&self, region: Region) -> usize {
        self.defs.iter().filter(|def| def.region == region).count()
    }

    pub fn from_yaml_str(data: &str) -> Result<Self, CatalogError> {
        if let Ok(entries) = serde_yaml::from_str::<Vec<FileRegister>>(data) {
            return Self::new(entries.into_iter().map(FileRegister::into_def).collect());
        }
        let root: FileCatalog = serde_yaml::from_str(data)?;
        Self::new(root.registers.into_iter().map(FileRegister::into_def).collect())
    }

    pub fn from_json_str(data: &str) -> Result<Self, CatalogError> {
        if let Ok(entries) = serde_json::from_str::<Vec<FileRegister>>(data) {
            return Self::new(entries.into_iter().map(FileRegister::into_def).collect());
        }
        let root: FileCatalog = serde_json::from_str(data)?;
        Self::new(root.registers.into_iter().map(FileRegister::into_def).collect())
    }
}

fn check_overlaps(defs: &[RegisterDef]) -> Result<(), CatalogError> {
    let mut spans: Vec<(&RegisterDef, u16, u32)> = defs
        .iter()
        .map(|def| {
            let end = u32::from(def.address) + u32::from(def.word_span());
            (def, def.address, end)
        })
        .collect();
    spans.sort_by_key(|(def, start, _)| (def.region, *start));

    for pair in spans.windows(2) {
        let (prev, _, prev_end) = pair[0];
        let (next, next_start, _) = pair[1];
        if prev.region == next.region && u32::from(next_start) < prev_end {
            return Err(CatalogError::Overlap {
                region: prev.region,
                first: prev.key.clone(),
                second: next.key.clone(),
            });
        }
    }
    Ok(())
}

/// On-disk catalog entry; `modbus.yaml` ships either a bare list or a
/// `registers:` table.
#[derive(Debug, Deserialize)]
struct FileRegister {
    key: String,
    #[serde(default)]
    name: Option<String>,
    address: u16,
    region: Region,
    data_type: DataType,
    #[serde(default)]
    scale: Option<f64>,
    #[serde(default)]
    offset: Option<f64>,
    #[serde(default)]
    precision: Option<u8>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    writable: bool,
    #[serde(default)]
    cumulative: bool,
}

impl FileRegister {
    fn into_def(self) -> RegisterDef {
        let name = self.name.unwrap_or_else(|| self.key.clone());
        RegisterDef {
            key: self.key,
            name,
            address: self.address,
            region: self.region,
            data_type: self.data_type,
            scale: self.scale,
            offset: self.offset,
            precision: self.precision,
            unit: self.unit,
            writable: self.writable,
            cumulative: self.cumulative,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileCatalog {
    registers: Vec<FileRegister>,
}

/// Memoizes parsed catalogs by content fingerprint so reloads of the same
/// file text stay cheap.
#[derive(Default)]
pub struct CatalogCache {
    yaml_cache: HashMap<u64, RegisterMap>,
    json_cache: HashMap<u64, RegisterMap>,
}

impl CatalogCache {
    pub fn parse_yaml(&mut self, data: &str) -> Result<RegisterMap, CatalogError> {
        let key = fingerprint(data);
        if let Some(map) = self.yaml_cache.get(&key) {
            tracing::debug!(fingerprint = key, "yaml catalog cache hit");
            return Ok(map.clone());
        }
        let map = RegisterMap::from_yaml_str(data)?;
        self.yaml_cache.insert(key, map.clone());
        Ok(map)
    }

    pub fn parse_json(&mut self, data: &str) -> Result<RegisterMap, CatalogError> {
        let key = fingerprint(data);
        if let Some(map) = self.json_cache.get(&key) {
            tracing::debug!(fingerprint = key, "json catalog cache hit");
            return Ok(map.clone());
        }
        let map = RegisterMap::from_json_str(data)?;
        self.json_cache.insert(key, map.clone());
        Ok(map)
    }

    pub fn yaml_cache_len(&self) -> usize {
        self.yaml_cache.len()
    }

    pub fn json_cache_len(&self) -> usize {
        self.json_cache.len()
    }
}

fn fingerprint(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
