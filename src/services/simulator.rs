//! Local random-walk price simulation
//!
//! Animates prices between real fetches. Purely cosmetic: change percentages
//! and volume are left alone, market cap follows the simulated price.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::asset_store::{AssetStore, LoadStatus};

pub struct PriceSimulator {
    fluctuation: f64,
    rng: StdRng,
}

impl PriceSimulator {
    pub fn new(fluctuation: f64) -> Self {
        Self {
            fluctuation,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_seed(fluctuation: f64, seed: u64) -> Self {
        Self {
            fluctuation,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Perturb every record once. Returns how many were touched; nothing
    /// happens unless the store is loaded and non-empty.
    pub fn tick(&mut self, store: &mut AssetStore) -> usize {
        if store.status() != LoadStatus::Loaded || store.is_empty() {
            return 0;
        }

        let next: Vec<(String, f64)> = store
            .assets()
            .iter()
            .map(|a| {
                let u: f64 = self.rng.random();
                (a.id.clone(), fluctuate(a.price, u, self.fluctuation))
            })
            .collect();

        next.iter()
            .filter(|(id, price)| store.patch_simulated(id, *price))
            .count()
    }
}

/// `price × (1 + (u − 0.5) × k)` for a draw `u` in [0, 1)
pub fn fluctuate(price: f64, u: f64, k: f64) -> f64 {
    price * (1.0 + (u - 0.5) * k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::services::asset_store::tests::asset;

    #[test]
    fn test_fluctuate_bounds() {
        assert_eq!(fluctuate(100.0, 0.5, 0.001), 100.0);
        assert!((fluctuate(100.0, 0.0, 0.001) - 99.95).abs() < 1e-9);
        assert!(fluctuate(100.0, 0.999_999, 0.001) < 100.05);
    }

    #[test]
    fn test_tick_stays_in_band_and_derives_market_cap() {
        let mut store = AssetStore::new();
        store.fetch_succeeded(vec![asset("bitcoin", 1, 100.0, 1000.0)]);
        let mut sim = PriceSimulator::with_seed(0.001, 7);

        for _ in 0..200 {
            store.fetch_succeeded(vec![asset("bitcoin", 1, 100.0, 1000.0)]);
            assert_eq!(sim.tick(&mut store), 1);

            let btc = store.get("bitcoin").unwrap();
            assert!((99.95..=100.05).contains(&btc.price), "price {}", btc.price);
            assert_eq!(btc.market_cap, btc.price * 1000.0);
            assert_eq!(btc.change_1h, 0.5);
            assert_eq!(btc.volume_24h, 1_000.0);
        }
    }

    #[test]
    fn test_tick_requires_loaded_store() {
        let mut store = AssetStore::new();
        let mut sim = PriceSimulator::with_seed(0.001, 1);
        assert_eq!(sim.tick(&mut store), 0);

        store.fetch_succeeded(vec![asset("bitcoin", 1, 100.0, 1000.0)]);
        store.fetch_failed(FetchError::RateLimited);
        assert_eq!(sim.tick(&mut store), 0);
        assert_eq!(store.get("bitcoin").unwrap().price, 100.0);
    }
}
