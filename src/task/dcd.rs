// src/task/dcd.rs

//! Composition data (page 0) layout.
//!
//! ```text
//! header:  cid(2) pid(2) vid(2) crpl(2) features(2)      little endian
//! element: loc(2) num_s(1) num_v(1) sig[num_s](2) vendor[num_v](4)
//! ```

use std::fmt;

use thiserror::Error;

use crate::transport::ModelId;

const HEADER_SIZE: usize = 10;
const ELEMENT_HEADER_SIZE: usize = 4;
const SIG_MODEL_SIZE: usize = 2;
const VENDOR_MODEL_SIZE: usize = 4;

const FEATURE_RELAY: u16 = 1 << 0;
const FEATURE_PROXY: u16 = 1 << 1;
const FEATURE_FRIEND: u16 = 1 << 2;
const FEATURE_LOW_POWER: u16 = 1 << 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompositionError {
    #[error("composition data truncated at offset {offset}: need {needed} more bytes, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("element {element} has {count} models of one kind; at most 255 fit")]
    TooManyModels { element: usize, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features {
    pub relay: bool,
    pub proxy: bool,
    pub friend: bool,
    pub low_power: bool,
}

impl Features {
    fn from_bits(bits: u16) -> Self {
        Self {
            relay: bits & FEATURE_RELAY != 0,
            proxy: bits & FEATURE_PROXY != 0,
            friend: bits & FEATURE_FRIEND != 0,
            low_power: bits & FEATURE_LOW_POWER != 0,
        }
    }

    fn bits(&self) -> u16 {
        let mut bits = 0;
        if self.relay {
            bits |= FEATURE_RELAY;
        }
        if self.proxy {
            bits |= FEATURE_PROXY;
        }
        if self.friend {
            bits |= FEATURE_FRIEND;
        }
        if self.low_power {
            bits |= FEATURE_LOW_POWER;
        }
        bits
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub location: u16,
    pub sig_models: Vec<u16>,
    pub vendor_models: Vec<ModelId>,
}

impl Element {
    /// All models of the element, SIG models first.
    pub fn models(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.sig_models
            .iter()
            .map(|id| ModelId::sig(*id))
            .chain(self.vendor_models.iter().copied())
    }
}

/// Parsed composition data of a node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Composition {
    pub company_id: u16,
    pub product_id: u16,
    pub version_id: u16,
    pub replay_protection_list_len: u16,
    pub features: Features,
    pub elements: Vec<Element>,
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn ensure(&self, needed: usize) -> Result<(), CompositionError> {
        if self.remaining() < needed {
            return Err(CompositionError::Truncated {
                offset: self.offset,
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, CompositionError> {
        self.ensure(1)?;
        let v = self.data[self.offset];
        self.offset += 1;
        Ok(v)
    }

    fn u16_le(&mut self) -> Result<u16, CompositionError> {
        self.ensure(2)?;
        let v = u16::from_le_bytes([self.data[self.offset], self.data[self.offset + 1]]);
        self.offset += 2;
        Ok(v)
    }
}

impl Composition {
    /// Parse a complete composition data page 0.
    pub fn parse(data: &[u8]) -> Result<Self, CompositionError> {
        let mut reader = Reader { data, offset: 0 };
        reader.ensure(HEADER_SIZE)?;

        let company_id = reader.u16_le()?;
        let product_id = reader.u16_le()?;
        let version_id = reader.u16_le()?;
        let replay_protection_list_len = reader.u16_le()?;
        let features = Features::from_bits(reader.u16_le()?);

        let mut elements = Vec::new();
        while reader.remaining() > 0 {
            reader.ensure(ELEMENT_HEADER_SIZE)?;
            let location = reader.u16_le()?;
            let num_sig = usize::from(reader.u8()?);
            let num_vendor = usize::from(reader.u8()?);

            // Check the whole element up front so a short element is reported
            // at its start rather than somewhere in the model list.
            reader.ensure(num_sig * SIG_MODEL_SIZE + num_vendor * VENDOR_MODEL_SIZE)?;

            let mut element = Element {
                location,
                sig_models: Vec::with_capacity(num_sig),
                vendor_models: Vec::with_capacity(num_vendor),
            };
            for _ in 0..num_sig {
                element.sig_models.push(reader.u16_le()?);
            }
            for _ in 0..num_vendor {
                let vendor_id = reader.u16_le()?;
                let model_id = reader.u16_le()?;
                element.vendor_models.push(ModelId::vendor(vendor_id, model_id));
            }
            elements.push(element);
        }

        Ok(Self {
            company_id,
            product_id,
            version_id,
            replay_protection_list_len,
            features,
            elements,
        })
    }

    /// Serialize into the page 0 wire layout.
    ///
    /// Each element carries its model counts in one byte, so an element with
    /// more than 255 SIG or vendor models cannot be encoded.
    pub fn encode(&self) -> Result<Vec<u8>, CompositionError> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        for v in [
            self.company_id,
            self.product_id,
            self.version_id,
            self.replay_protection_list_len,
            self.features.bits(),
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for (index, element) in self.elements.iter().enumerate() {
            let count = |len: usize| {
                u8::try_from(len).map_err(|_| CompositionError::TooManyModels {
                    element: index,
                    count: len,
                })
            };
            out.extend_from_slice(&element.location.to_le_bytes());
            out.push(count(element.sig_models.len())?);
            out.push(count(element.vendor_models.len())?);
            for model in &element.sig_models {
                out.extend_from_slice(&model.to_le_bytes());
            }
            for model in &element.vendor_models {
                out.extend_from_slice(&model.vendor_id.to_le_bytes());
                out.extend_from_slice(&model.model_id.to_le_bytes());
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cid=0x{:04x},pid=0x{:04x},vid=0x{:04x},crpl={},relay={},proxy={},friend={},lpn={},elements={}",
            self.company_id,
            self.product_id,
            self.version_id,
            self.replay_protection_list_len,
            u8::from(self.features.relay),
            u8::from(self.features.proxy),
            u8::from(self.features.friend),
            u8::from(self.features.low_power),
            self.elements.len()
        )
    }
}
