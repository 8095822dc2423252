//! Map between RTP header-extension kinds and their negotiated one-byte IDs
//! (RFC 5285).

use rtp_shared::{Error, Result};
use std::collections::HashMap;

/// Header extensions the receiver understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    /// RFC 5450 transmission time offset.
    TransmissionTimeOffset,
    /// RFC 6464/6465 audio level.
    AudioLevel,
}

/// Bijective map from one-byte extension IDs (1..=14) to extension kinds.
#[derive(Default, Debug, Clone)]
pub struct HeaderExtensionMap {
    ids: HashMap<u8, ExtensionKind>,
}

impl HeaderExtensionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `kind` under `id`. Re-registering the same pair is a no-op;
    /// a taken ID or an already-mapped kind is rejected.
    pub fn register(&mut self, kind: ExtensionKind, id: u8) -> Result<()> {
        if !(1..=14).contains(&id) {
            return Err(Error::ErrExtensionIdOutOfRange);
        }
        if let Some(existing) = self.ids.get(&id) {
            if *existing == kind {
                return Ok(());
            }
            return Err(Error::ErrExtensionIdInUse);
        }
        if self.id_of(kind).is_some() {
            return Err(Error::ErrExtensionAlreadyRegistered);
        }
        self.ids.insert(id, kind);
        Ok(())
    }

    pub fn deregister(&mut self, kind: ExtensionKind) -> Result<()> {
        match self.id_of(kind) {
            Some(id) => {
                self.ids.remove(&id);
                Ok(())
            }
            None => Err(Error::ErrExtensionNotRegistered),
        }
    }

    pub fn lookup(&self, id: u8) -> Option<ExtensionKind> {
        self.ids.get(&id).copied()
    }

    pub fn id_of(&self, kind: ExtensionKind) -> Option<u8> {
        self.ids
            .iter()
            .find(|(_, k)| **k == kind)
            .map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut map = HeaderExtensionMap::new();
        map.register(ExtensionKind::TransmissionTimeOffset, 3).unwrap();

        assert_eq!(map.lookup(3), Some(ExtensionKind::TransmissionTimeOffset));
        assert_eq!(map.lookup(4), None);
        assert_eq!(map.id_of(ExtensionKind::TransmissionTimeOffset), Some(3));
    }

    #[test]
    fn test_register_rejects_out_of_range_ids() {
        let mut map = HeaderExtensionMap::new();
        assert_eq!(
            map.register(ExtensionKind::AudioLevel, 0),
            Err(Error::ErrExtensionIdOutOfRange)
        );
        assert_eq!(
            map.register(ExtensionKind::AudioLevel, 15),
            Err(Error::ErrExtensionIdOutOfRange)
        );
    }

    #[test]
    fn test_register_is_idempotent_for_same_pair() {
        let mut map = HeaderExtensionMap::new();
        map.register(ExtensionKind::AudioLevel, 1).unwrap();
        map.register(ExtensionKind::AudioLevel, 1).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_register_rejects_conflicts() {
        let mut map = HeaderExtensionMap::new();
        map.register(ExtensionKind::AudioLevel, 1).unwrap();

        // Same ID, different kind.
        assert_eq!(
            map.register(ExtensionKind::TransmissionTimeOffset, 1),
            Err(Error::ErrExtensionIdInUse)
        );
        // Same kind, different ID.
        assert_eq!(
            map.register(ExtensionKind::AudioLevel, 2),
            Err(Error::ErrExtensionAlreadyRegistered)
        );
    }

    #[test]
    fn test_deregister() {
        let mut map = HeaderExtensionMap::new();
        map.register(ExtensionKind::AudioLevel, 1).unwrap();
        map.deregister(ExtensionKind::AudioLevel).unwrap();

        assert!(map.is_empty());
        assert_eq!(
            map.deregister(ExtensionKind::AudioLevel),
            Err(Error::ErrExtensionNotRegistered)
        );
        // The ID is free again.
        map.register(ExtensionKind::TransmissionTimeOffset, 1).unwrap();
    }
}
