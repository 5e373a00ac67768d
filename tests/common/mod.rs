//! In-memory adapters shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use rust_cep_coords::errors::ResolverError;
use rust_cep_coords::models::{Address, Coordinate, Lookup, ResultSet};
use rust_cep_coords::services::{AddressResolver, Geocoder};

pub fn address(logradouro: &str, bairro: &str, cidade: &str, uf: &str) -> Address {
    Address {
        logradouro: logradouro.to_string(),
        bairro: bairro.to_string(),
        cidade: cidade.to_string(),
        uf: uf.to_string(),
        complemento: None,
    }
}

pub fn coordinate(lat: &str, lon: &str) -> Coordinate {
    Coordinate {
        lat: lat.to_string(),
        lon: lon.to_string(),
    }
}

/// Resolver answering from a fixed table; CEPs in `quota_on` raise a quota error.
#[derive(Default)]
pub struct FakeResolver {
    addresses: HashMap<String, Address>,
    quota_on: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, cep: &str, address: Address) -> Self {
        self.addresses.insert(cep.to_string(), address);
        self
    }

    pub fn quota_exceeded_on(mut self, cep: &str) -> Self {
        self.quota_on.insert(cep.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl AddressResolver for FakeResolver {
    async fn resolve(&self, cep: &str) -> Result<Lookup<Address>, ResolverError> {
        self.calls.lock().unwrap().push(cep.to_string());
        if self.quota_on.contains(cep) {
            return Err(ResolverError::QuotaExceeded(format!("limit hit on {}", cep)));
        }
        Ok(self.addresses.get(cep).cloned().into())
    }
}

/// Geocoder answering by CEP from a fixed table.
#[derive(Default)]
pub struct FakeGeocoder {
    coordinates: HashMap<String, Coordinate>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, cep: &str, coordinate: Coordinate) -> Self {
        self.coordinates.insert(cep.to_string(), coordinate);
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Geocoder for FakeGeocoder {
    async fn geocode(&self, query: &str, cep: &str) -> Lookup<Coordinate> {
        self.calls
            .lock()
            .unwrap()
            .push((query.to_string(), cep.to_string()));
        self.coordinates.get(cep).cloned().into()
    }
}

/// Every id classified exactly once across the three buckets.
pub fn assert_partition(results: &ResultSet) {
    let mut seen = HashSet::new();
    let ids = results
        .located()
        .iter()
        .map(|r| r.id)
        .chain(results.address_only().iter().map(|r| r.id))
        .chain(results.not_found().iter().map(|r| r.id));
    for id in ids {
        assert!(seen.insert(id), "id {} classified more than once", id);
    }
    assert_eq!(seen.len(), results.len());
}
