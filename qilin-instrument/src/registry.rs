use crate::{
    instrument::{Instrument, InstrumentError},
    symbol::Symbol,
};
use fnv::FnvHashMap;

/// Session-scoped `Symbol -> Instrument` lookup.
///
/// Loaded at startup and replaced wholesale on a session boundary via [`Self::reload`]; the core
/// treats the registry as read-only while a session is live.
#[derive(Debug, Clone, Default)]
pub struct InstrumentRegistry {
    instruments: FnvHashMap<Symbol, Instrument>,
}

impl InstrumentRegistry {
    /// Construct a registry from the provided instruments.
    pub fn new(instruments: impl IntoIterator<Item = Instrument>) -> Self {
        Self {
            instruments: instruments
                .into_iter()
                .map(|instrument| (instrument.symbol.clone(), instrument))
                .collect(),
        }
    }

    /// Lookup the [`Instrument`] for the provided [`Symbol`], if present.
    pub fn get(&self, symbol: &Symbol) -> Option<&Instrument> {
        self.instruments.get(symbol)
    }

    /// Lookup the [`Instrument`] for the provided [`Symbol`], failing with
    /// [`InstrumentError::UnknownSymbol`] if absent.
    pub fn find(&self, symbol: &Symbol) -> Result<&Instrument, InstrumentError> {
        self.instruments
            .get(symbol)
            .ok_or_else(|| InstrumentError::UnknownSymbol(symbol.clone()))
    }

    /// Replace the full instrument set. Only valid between sessions (quiesced core).
    pub fn reload(&mut self, instruments: impl IntoIterator<Item = Instrument>) {
        self.instruments = instruments
            .into_iter()
            .map(|instrument| (instrument.symbol.clone(), instrument))
            .collect();
    }

    /// Iterate all registered instruments.
    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.values()
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}
