//! NVS Backend
//!
//! Flash-backed key/value area addressed by numeric item ids. The partition
//! is split into two banks; every change serializes the whole item table into
//! the inactive bank under the next sequence number. Mount picks the valid
//! bank with the newest sequence, so a commit torn by power loss leaves the
//! previous table in charge.
//!
//! ```text
//! bank: | magic "NVSB" | sequence u32 | payload len u32 | sha256[..8] | payload |
//! payload entry: | id u16 | len u32 | data |
//! ```

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use super::flash::FlashDevice;
use super::BlobBackend;
use crate::engine::error::{Result, StoreError};
use crate::engine::items;

const BANK_MAGIC: &[u8; 4] = b"NVSB";
const HEADER_LEN: usize = 4 + 4 + 4 + 8;
const ENTRY_HEADER_LEN: usize = 2 + 4;

/// Numeric id of a logical item in the NVS table.
pub fn item_id(name: &str) -> Option<u16> {
    match name {
        items::PRIVATE_KEY => Some(1),
        items::PUBLIC_KEY => Some(2),
        items::DEPLOYMENT_DATA => Some(3),
        items::PROVIDES => Some(4),
        items::ARTIFACT_NAME => Some(5),
        items::UPDATE_STATE => Some(6),
        _ => None,
    }
}

fn digest_prefix(payload: &[u8]) -> [u8; 8] {
    let digest = Sha256::digest(payload);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    prefix
}

/// `a` is newer than `b`, tolerating sequence wrap-around.
fn is_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

pub struct NvsBackend<F: FlashDevice> {
    flash: F,
    bank_len: usize,
    items: BTreeMap<u16, Vec<u8>>,
    active_bank: Option<usize>,
    sequence: u32,
}

impl<F: FlashDevice> NvsBackend<F> {
    /// Mount the partition, recovering the newest intact item table.
    pub fn mount(mut flash: F) -> Result<Self> {
        let banks_sectors = flash.sector_count() / 2;
        if banks_sectors == 0 {
            return Err(StoreError::InvalidInput(
                "NVS partition needs at least two sectors".to_string(),
            ));
        }
        let bank_len = banks_sectors * flash.sector_size();
        if bank_len <= HEADER_LEN {
            return Err(StoreError::InvalidInput(
                "NVS sectors too small for a bank header".to_string(),
            ));
        }

        let mut best: Option<(usize, u32, BTreeMap<u16, Vec<u8>>)> = None;
        for bank in 0..2 {
            match Self::load_bank(&mut flash, bank, bank_len)? {
                Some((sequence, items)) => {
                    let newer = best
                        .as_ref()
                        .map_or(true, |(_, best_seq, _)| is_newer(sequence, *best_seq));
                    if newer {
                        best = Some((bank, sequence, items));
                    }
                }
                None => continue,
            }
        }

        let (active_bank, sequence, items) = match best {
            Some((bank, sequence, items)) => {
                tracing::debug!("Mounted NVS bank {} at sequence {}", bank, sequence);
                (Some(bank), sequence, items)
            }
            None => {
                tracing::info!("No NVS bank found, starting empty");
                (None, 0, BTreeMap::new())
            }
        };

        Ok(Self {
            flash,
            bank_len,
            items,
            active_bank,
            sequence,
        })
    }

    /// Release the underlying flash device.
    pub fn into_flash(self) -> F {
        self.flash
    }

    /// Largest total payload a bank can hold.
    pub fn payload_capacity(&self) -> usize {
        self.bank_len - HEADER_LEN
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    fn load_bank(
        flash: &mut F,
        bank: usize,
        bank_len: usize,
    ) -> Result<Option<(u32, BTreeMap<u16, Vec<u8>>)>> {
        let base = bank * bank_len;
        let mut header = [0u8; HEADER_LEN];
        flash.read(base, &mut header)?;

        if &header[..4] != BANK_MAGIC {
            return Ok(None);
        }
        let sequence = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let payload_len =
            u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
        if payload_len > bank_len - HEADER_LEN {
            tracing::warn!("Discarding NVS bank {}: bad payload length", bank);
            return Ok(None);
        }

        let mut payload = vec![0u8; payload_len];
        flash.read(base + HEADER_LEN, &mut payload)?;
        if header[12..20] != digest_prefix(&payload) {
            tracing::warn!("Discarding NVS bank {}: checksum mismatch", bank);
            return Ok(None);
        }

        match Self::decode_table(&payload) {
            Some(items) => Ok(Some((sequence, items))),
            None => {
                tracing::warn!("Discarding NVS bank {}: malformed item table", bank);
                Ok(None)
            }
        }
    }

    fn decode_table(mut payload: &[u8]) -> Option<BTreeMap<u16, Vec<u8>>> {
        let mut items = BTreeMap::new();
        while !payload.is_empty() {
            if payload.len() < ENTRY_HEADER_LEN {
                return None;
            }
            let id = u16::from_le_bytes([payload[0], payload[1]]);
            let len = u32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]) as usize;
            let rest = &payload[ENTRY_HEADER_LEN..];
            if rest.len() < len {
                return None;
            }
            items.insert(id, rest[..len].to_vec());
            payload = &rest[len..];
        }
        Some(items)
    }

    fn encode_table(items: &BTreeMap<u16, Vec<u8>>) -> Vec<u8> {
        let mut payload = Vec::new();
        for (id, data) in items {
            payload.extend_from_slice(&id.to_le_bytes());
            payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
            payload.extend_from_slice(data);
        }
        payload
    }

    /// Persist `items` into the inactive bank and make it active.
    fn commit(&mut self, items: BTreeMap<u16, Vec<u8>>) -> Result<()> {
        let payload = Self::encode_table(&items);
        if payload.len() > self.payload_capacity() {
            return Err(StoreError::StorageFull {
                needed: payload.len(),
                available: self.payload_capacity(),
            });
        }

        let target = match self.active_bank {
            Some(bank) => 1 - bank,
            None => 0,
        };
        let sequence = self.sequence.wrapping_add(1);

        let mut image = Vec::with_capacity(HEADER_LEN + payload.len());
        image.extend_from_slice(BANK_MAGIC);
        image.extend_from_slice(&sequence.to_le_bytes());
        image.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        image.extend_from_slice(&digest_prefix(&payload));
        image.extend_from_slice(&payload);

        let base = target * self.bank_len;
        self.flash.erase_range(base, self.bank_len)?;
        if let Err(e) = self.flash.write(base, &image) {
            tracing::error!("Unable to commit NVS bank {}: {}", target, e);
            return Err(e.into());
        }

        self.items = items;
        self.active_bank = Some(target);
        self.sequence = sequence;
        Ok(())
    }

    fn id_for(name: &str) -> Result<u16> {
        item_id(name).ok_or_else(|| StoreError::UnknownItem(name.to_string()))
    }
}

impl<F: FlashDevice> BlobBackend for NvsBackend<F> {
    fn write(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let id = Self::id_for(name)?;
        if self.items.get(&id).map(Vec::as_slice) == Some(data) {
            return Ok(());
        }
        let mut items = self.items.clone();
        items.insert(id, data.to_vec());
        self.commit(items)
    }

    fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let id = Self::id_for(name)?;
        match self.items.get(&id) {
            Some(data) if !data.is_empty() => Ok(data.clone()),
            _ => Err(StoreError::NotFound(name.to_string())),
        }
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        let id = Self::id_for(name)?;
        if !self.items.contains_key(&id) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        let mut items = self.items.clone();
        items.remove(&id);
        self.commit(items)
    }
}
