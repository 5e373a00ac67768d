use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::errors::AppError;

/// Length of a Brazilian postal code once punctuation is stripped.
pub const CEP_LEN: usize = 8;

// ============ Input ============

/// One row of the input spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRow {
    /// 1-based row identifier, strictly ascending through the file.
    pub id: u64,
    /// Normalized postal code (see [`normalize_cep`]).
    pub cep: String,
}

impl InputRow {
    pub fn new(id: u64, cep: impl Into<String>) -> Self {
        Self {
            id,
            cep: cep.into(),
        }
    }
}

// ============ Adapter results ============

/// Outcome of a lookup against an external service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Lookup::Found(v),
            None => Lookup::NotFound,
        }
    }
}

/// Address resolved from a CEP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Street name.
    pub logradouro: String,
    /// Neighborhood.
    pub bairro: String,
    /// City.
    pub cidade: String,
    /// State (two-letter code).
    pub uf: String,
    /// Optional detail, e.g. "lado ímpar".
    pub complemento: Option<String>,
}

/// Geographic coordinate as returned by the geocoder.
///
/// Kept as the upstream decimal strings so persisted values are byte-exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: String,
    pub lon: String,
}

// ============ Result rows ============

/// Output category of a processed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Address resolved and geocoded.
    Located,
    /// Address resolved, geocoding failed.
    AddressOnly,
    /// Postal code did not resolve.
    NotFound,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Located, Bucket::AddressOnly, Bucket::NotFound];

    /// File name the bucket is persisted under.
    pub fn file_name(self) -> &'static str {
        match self {
            Bucket::Located => "latloncep.csv",
            Bucket::AddressOnly => "cepfound.csv",
            Bucket::NotFound => "cepnotfound.csv",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Bucket::Located => "located",
            Bucket::AddressOnly => "address-only",
            Bucket::NotFound => "not-found",
        };
        f.write_str(name)
    }
}

/// Row of `latloncep.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedRow {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: u64,
    pub lat: String,
    pub lon: String,
    #[serde(deserialize_with = "deserialize_cep")]
    pub cep: String,
}

/// Row of `cepfound.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressOnlyRow {
    pub bairro: String,
    #[serde(deserialize_with = "deserialize_cep")]
    pub cep: String,
    pub cidade: String,
    pub logradouro: String,
    pub uf: String,
    pub complemento: Option<String>,
    #[serde(deserialize_with = "deserialize_id")]
    pub id: u64,
}

impl AddressOnlyRow {
    pub fn from_address(id: u64, cep: &str, address: Address) -> Self {
        Self {
            bairro: address.bairro,
            cep: cep.to_string(),
            cidade: address.cidade,
            logradouro: address.logradouro,
            uf: address.uf,
            complemento: address.complemento,
            id,
        }
    }
}

/// Row of `cepnotfound.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotFoundRow {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: u64,
    #[serde(deserialize_with = "deserialize_cep")]
    pub cep: String,
}

/// Anything stored in a result collection, keyed by input row id.
pub trait Keyed {
    fn id(&self) -> u64;
}

impl Keyed for LocatedRow {
    fn id(&self) -> u64 {
        self.id
    }
}

impl Keyed for AddressOnlyRow {
    fn id(&self) -> u64 {
        self.id
    }
}

impl Keyed for NotFoundRow {
    fn id(&self) -> u64 {
        self.id
    }
}

/// A classified row, tagged with its bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultRow {
    Located(LocatedRow),
    AddressOnly(AddressOnlyRow),
    NotFound(NotFoundRow),
}

impl ResultRow {
    pub fn id(&self) -> u64 {
        match self {
            ResultRow::Located(r) => r.id,
            ResultRow::AddressOnly(r) => r.id,
            ResultRow::NotFound(r) => r.id,
        }
    }

    pub fn bucket(&self) -> Bucket {
        match self {
            ResultRow::Located(_) => Bucket::Located,
            ResultRow::AddressOnly(_) => Bucket::AddressOnly,
            ResultRow::NotFound(_) => Bucket::NotFound,
        }
    }

    /// Same classification, re-keyed to another row.
    pub fn with_id(self, id: u64) -> Self {
        match self {
            ResultRow::Located(r) => ResultRow::Located(LocatedRow { id, ..r }),
            ResultRow::AddressOnly(r) => ResultRow::AddressOnly(AddressOnlyRow { id, ..r }),
            ResultRow::NotFound(r) => ResultRow::NotFound(NotFoundRow { id, ..r }),
        }
    }
}

// ============ Collections ============

/// Append-only sequence of result rows, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOnly<T> {
    rows: Vec<T>,
}

impl<T> Default for AppendOnly<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T: Keyed> AppendOnly<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, row: T) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.rows.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.rows.last()
    }

    /// Finds the row with `id`, scanning from the most recent entry.
    pub fn get(&self, id: u64) -> Option<&T> {
        self.rows.iter().rev().find(|r| r.id() == id)
    }

    pub fn max_id(&self) -> Option<u64> {
        self.rows.iter().map(Keyed::id).max()
    }
}

impl<'a, T> IntoIterator for &'a AppendOnly<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// The three result collections of a run.
///
/// Every id lives in exactly one bucket; [`ResultSet::push`] refuses an id that
/// is already classified.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    located: AppendOnly<LocatedRow>,
    address_only: AppendOnly<AddressOnlyRow>,
    not_found: AppendOnly<NotFoundRow>,
    index: HashMap<u64, Bucket>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from previously persisted rows, checking the partition invariant.
    pub fn from_rows(
        located: Vec<LocatedRow>,
        address_only: Vec<AddressOnlyRow>,
        not_found: Vec<NotFoundRow>,
    ) -> Result<Self, AppError> {
        let mut set = Self::new();
        for row in located {
            set.push(ResultRow::Located(row))?;
        }
        for row in address_only {
            set.push(ResultRow::AddressOnly(row))?;
        }
        for row in not_found {
            set.push(ResultRow::NotFound(row))?;
        }
        Ok(set)
    }

    /// Appends a classified row to its bucket.
    pub fn push(&mut self, row: ResultRow) -> Result<(), AppError> {
        let id = row.id();
        if let Some(existing) = self.index.get(&id) {
            return Err(AppError::InternalError(format!(
                "id {} is already classified as {}, refusing to add it as {}",
                id,
                existing,
                row.bucket()
            )));
        }
        self.index.insert(id, row.bucket());
        match row {
            ResultRow::Located(r) => self.located.push(r),
            ResultRow::AddressOnly(r) => self.address_only.push(r),
            ResultRow::NotFound(r) => self.not_found.push(r),
        }
        Ok(())
    }

    pub fn bucket_of(&self, id: u64) -> Option<Bucket> {
        self.index.get(&id).copied()
    }

    /// Clones the row classified under `id`, if any.
    pub fn get(&self, id: u64) -> Option<ResultRow> {
        match self.bucket_of(id)? {
            Bucket::Located => self.located.get(id).cloned().map(ResultRow::Located),
            Bucket::AddressOnly => self
                .address_only
                .get(id)
                .cloned()
                .map(ResultRow::AddressOnly),
            Bucket::NotFound => self.not_found.get(id).cloned().map(ResultRow::NotFound),
        }
    }

    pub fn located(&self) -> &AppendOnly<LocatedRow> {
        &self.located
    }

    pub fn address_only(&self) -> &AppendOnly<AddressOnlyRow> {
        &self.address_only
    }

    pub fn not_found(&self) -> &AppendOnly<NotFoundRow> {
        &self.not_found
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn count(&self, bucket: Bucket) -> usize {
        match bucket {
            Bucket::Located => self.located.len(),
            Bucket::AddressOnly => self.address_only.len(),
            Bucket::NotFound => self.not_found.len(),
        }
    }
}

/// Where a run picks up: the highest classified id and the bucket holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunState {
    pub last_processed_id: u64,
    pub last_bucket: Option<Bucket>,
}

impl RunState {
    pub fn from_results(results: &ResultSet) -> Self {
        let candidates = [
            (results.located.max_id(), Bucket::Located),
            (results.address_only.max_id(), Bucket::AddressOnly),
            (results.not_found.max_id(), Bucket::NotFound),
        ];

        candidates
            .into_iter()
            .filter_map(|(id, bucket)| id.map(|id| (id, bucket)))
            .max_by_key(|(id, _)| *id)
            .map(|(id, bucket)| RunState {
                last_processed_id: id,
                last_bucket: Some(bucket),
            })
            .unwrap_or_default()
    }

    /// Records a freshly classified row.
    pub fn advance(&mut self, id: u64, bucket: Bucket) {
        self.last_processed_id = id;
        self.last_bucket = Some(bucket);
    }
}

// ============ Parsing helpers ============

/// Parses a row id, accepting integral floats such as `"12.0"`.
pub fn parse_id(raw: &str) -> Result<u64, AppError> {
    let raw = raw.trim();
    let id = match raw.parse::<u64>() {
        Ok(id) => id,
        Err(_) => {
            let value: f64 = raw
                .parse()
                .map_err(|_| AppError::InvalidInput(format!("'{}' is not a row id", raw)))?;
            if !value.is_finite() || value.fract() != 0.0 || value < 0.0 || value > u64::MAX as f64
            {
                return Err(AppError::InvalidInput(format!(
                    "'{}' is not an integral row id",
                    raw
                )));
            }
            value as u64
        }
    };

    if id == 0 {
        return Err(AppError::InvalidInput("row ids start at 1".to_string()));
    }
    Ok(id)
}

/// Normalizes a postal code as it appears in a spreadsheet cell.
///
/// Punctuation is dropped (`01001-000`, `01.001-000`), float renderings of
/// numeric cells are accepted (`1001000.0`) and leading zeros lost by numeric
/// cells are restored (`1001000` becomes `01001000`).
pub fn normalize_cep(raw: &str) -> String {
    let trimmed = raw.trim();
    let integral = match trimmed.split_once('.') {
        Some((int, frac))
            if !int.is_empty()
                && int.chars().all(|c| c.is_ascii_digit())
                && !frac.is_empty()
                && frac.len() < 3
                && frac.chars().all(|c| c == '0') =>
        {
            int
        }
        _ => trimmed,
    };

    let digits: String = integral.chars().filter(|c| c.is_ascii_digit()).collect();
    if !digits.is_empty() && digits.len() < CEP_LEN {
        format!("{:0>width$}", digits, width = CEP_LEN)
    } else {
        digits
    }
}

/// True for an 8-digit postal code.
pub fn is_valid_cep(cep: &str) -> bool {
    cep.len() == CEP_LEN && cep.chars().all(|c| c.is_ascii_digit())
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_id(&raw).map_err(serde::de::Error::custom)
}

fn deserialize_cep<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(normalize_cep(&raw))
}
