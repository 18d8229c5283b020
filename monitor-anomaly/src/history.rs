use monitor_core::SymbolSeries;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Index-aligned funding-rate and open-interest series for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolHistory {
    funding_rates: VecDeque<f64>,
    open_interests: VecDeque<f64>,
    max_size: usize,
}

impl SymbolHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            funding_rates: VecDeque::with_capacity(max_size),
            open_interests: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Appends the pair unless it repeats the last one. Returns whether it
    /// was appended.
    pub fn push_if_changed(&mut self, funding_rate: f64, open_interest: f64) -> bool {
        let unchanged = matches!(
            (self.funding_rates.back(), self.open_interests.back()),
            (Some(&fr), Some(&oi)) if fr == funding_rate && oi == open_interest
        );
        if unchanged {
            return false;
        }

        self.funding_rates.push_back(funding_rate);
        self.open_interests.push_back(open_interest);

        while self.funding_rates.len() > self.max_size {
            self.funding_rates.pop_front();
            self.open_interests.pop_front();
        }

        true
    }

    pub fn funding_rates(&self) -> Vec<f64> {
        self.funding_rates.iter().copied().collect()
    }

    pub fn open_interests(&self) -> Vec<f64> {
        self.open_interests.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.funding_rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funding_rates.is_empty()
    }

    pub fn to_series(&self) -> SymbolSeries {
        SymbolSeries {
            funding_history: self.funding_rates(),
            open_interest_history: self.open_interests(),
        }
    }
}

/// Result of [`HistoryStore::record_if_changed`]. The vectors are copies.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub changed: bool,
    pub funding: Vec<f64>,
    pub open_interest: Vec<f64>,
}

/// Per-symbol bounded histories, created lazily and kept for the lifetime
/// of the store.
///
/// Flat readings are not appended, so a quiet symbol keeps old extrema in
/// its window much longer than a volatile one does.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    histories: HashMap<String, SymbolHistory>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            histories: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record_if_changed(
        &mut self,
        symbol: &str,
        funding_rate: f64,
        open_interest: f64,
    ) -> Recorded {
        let capacity = self.capacity;
        let history = self
            .histories
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolHistory::new(capacity));

        let changed = history.push_if_changed(funding_rate, open_interest);

        Recorded {
            changed,
            funding: history.funding_rates(),
            open_interest: history.open_interests(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<SymbolSeries> {
        self.histories.get(symbol).map(SymbolHistory::to_series)
    }

    /// Copies every symbol's series, ordered by symbol.
    pub fn snapshot(&self) -> BTreeMap<String, SymbolSeries> {
        self.histories
            .iter()
            .map(|(symbol, history)| (symbol.clone(), history.to_series()))
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}
