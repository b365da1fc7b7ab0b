//! Asset identifiers and the symbol <-> type tag lookup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Assets the keeper knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
	Sui,
	Usdc,
	Usdt,
	Usdy,
	Buck,
}

impl Asset {
	pub const ALL: [Asset; 5] = [Asset::Sui, Asset::Usdc, Asset::Usdt, Asset::Usdy, Asset::Buck];

	pub fn symbol(&self) -> &'static str {
		match self {
			Asset::Sui => "SUI",
			Asset::Usdc => "USDC",
			Asset::Usdt => "USDT",
			Asset::Usdy => "USDY",
			Asset::Buck => "BUCK",
		}
	}

	/// Mainnet coin type used when no override is configured.
	pub fn default_type_tag(&self) -> &'static str {
		match self {
			Asset::Sui => "0x2::sui::SUI",
			Asset::Usdc => {
				"0xdba34672e30cb065b1f93e3ab55318768fd6fef66c15942c9f7cb846e2f900e7::usdc::USDC"
			}
			Asset::Usdt => {
				"0xc060006111016b8a020ad5b33834984a437aaa7d3c74c18e09a95d48aceab08c::coin::COIN"
			}
			Asset::Usdy => {
				"0x960b531667636f39e85867775f52f6b1f220a058c4de786905bdf761e06a56bb::usdy::USDY"
			}
			Asset::Buck => {
				"0xce7ff77a83ea0cb6fd39bd8748e2ec89a3f41e8efdc3f4eb123e0ca37b184db2::buck::BUCK"
			}
		}
	}
}

impl fmt::Display for Asset {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.symbol())
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
	#[error("Unknown asset symbol: {0}")]
	UnknownSymbol(String),
	#[error("Unsupported coin type: {0}")]
	UnsupportedType(String),
	#[error("Malformed coin type: {0}")]
	MalformedType(String),
}

impl FromStr for Asset {
	type Err = AssetError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Asset::ALL
			.into_iter()
			.find(|a| a.symbol().eq_ignore_ascii_case(s.trim()))
			.ok_or_else(|| AssetError::UnknownSymbol(s.to_string()))
	}
}

/// Canonical form of a Move type tag: lowercase address without leading zeros.
///
/// `0x0000...0002::sui::SUI` and `0x2::sui::SUI` normalize to the same string.
pub fn normalize_type_tag(tag: &str) -> Result<String, AssetError> {
	let tag = tag.trim();
	let (address, rest) = tag
		.split_once("::")
		.ok_or_else(|| AssetError::MalformedType(tag.to_string()))?;
	let digits = address.strip_prefix("0x").unwrap_or(address);
	if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) || !rest.contains("::") {
		return Err(AssetError::MalformedType(tag.to_string()));
	}
	let trimmed = digits.trim_start_matches('0');
	let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
	Ok(format!("0x{}::{}", trimmed.to_ascii_lowercase(), rest))
}

/// Resolves asset symbols to on-chain coin types and back.
///
/// Built once from the defaults plus `[assets]` overrides and handed to the
/// components that need it.
#[derive(Debug, Clone)]
pub struct AssetRegistry {
	by_asset: HashMap<Asset, String>,
	by_type: HashMap<String, Asset>,
}

impl Default for AssetRegistry {
	fn default() -> Self {
		let mut registry = Self {
			by_asset: HashMap::new(),
			by_type: HashMap::new(),
		};
		for asset in Asset::ALL {
			// Defaults are well-formed.
			let _ = registry.insert(asset, asset.default_type_tag());
		}
		registry
	}
}

impl AssetRegistry {
	/// Defaults with `symbol -> type tag` overrides applied.
	pub fn from_overrides(overrides: &HashMap<String, String>) -> Result<Self, AssetError> {
		let mut registry = Self::default();
		for (symbol, tag) in overrides {
			let asset: Asset = symbol.parse()?;
			registry.insert(asset, tag)?;
		}
		Ok(registry)
	}

	fn insert(&mut self, asset: Asset, tag: &str) -> Result<(), AssetError> {
		let normalized = normalize_type_tag(tag)?;
		if let Some(previous) = self.by_asset.insert(asset, normalized.clone()) {
			self.by_type.remove(&previous);
		}
		self.by_type.insert(normalized, asset);
		Ok(())
	}

	pub fn type_tag(&self, asset: Asset) -> &str {
		self.by_asset
			.get(&asset)
			.map(String::as_str)
			.unwrap_or_else(|| asset.default_type_tag())
	}

	/// Resolves a coin type as stored on an order.
	pub fn resolve_type(&self, tag: &str) -> Result<Asset, AssetError> {
		let normalized = normalize_type_tag(tag)?;
		self.by_type
			.get(&normalized)
			.copied()
			.ok_or_else(|| AssetError::UnsupportedType(tag.to_string()))
	}
}
