//! ---
//! erc_section: "03-device-drivers"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Device drivers, shared state arena and polling monitors."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Sixteen-channel relay bank gating the reactor circuits. Channel states
//! are read as coils; commands go through a single 16-bit mask register so
//! one write switches the whole bank atomically.

use std::collections::BTreeSet;

use erc_modbus::{DeviceClient, Result};

/// Number of relay channels on the bank.
pub const CHANNEL_COUNT: u16 = 16;

/// First coil of the channel-state block.
pub const CHANNEL_COIL_BASE: u16 = 0x0000;

/// Command mask register; bit N energizes channel N+1.
pub const COMMAND_MASK_REGISTER: u16 = 0x0000;

#[derive(Clone)]
pub struct RelayBank {
    client: DeviceClient,
}

impl RelayBank {
    pub fn new(client: DeviceClient) -> Self {
        Self { client }
    }

    /// Read the energized state of all sixteen channels.
    pub async fn read_channels(&self) -> Result<[bool; CHANNEL_COUNT as usize]> {
        let bits = self
            .client
            .read_coils(CHANNEL_COIL_BASE, CHANNEL_COUNT)
            .await?;
        let mut channels = [false; CHANNEL_COUNT as usize];
        for (channel, bit) in channels.iter_mut().zip(bits) {
            *channel = bit;
        }
        Ok(channels)
    }

    /// Command the whole bank at once: bit N of `mask` energizes channel N+1.
    pub async fn write_mask(&self, mask: u16) -> Result<()> {
        self.client
            .write_register(COMMAND_MASK_REGISTER, mask)
            .await?;
        Ok(())
    }
}

/// Build the command mask energizing the relay channel of every reactor in
/// `active`. Reactor index `i` sits on channel `i + 1`, bit `i`.
pub fn mask_for_reactors(active: &BTreeSet<usize>) -> u16 {
    active
        .iter()
        .filter(|&&idx| idx < usize::from(CHANNEL_COUNT))
        .fold(0u16, |mask, &idx| mask | (1 << idx))
}

/// The channel pattern `mask` would produce, for confirmation against a
/// coil read.
pub fn channels_for_mask(mask: u16) -> [bool; CHANNEL_COUNT as usize] {
    let mut channels = [false; CHANNEL_COUNT as usize];
    for (bit, channel) in channels.iter_mut().enumerate() {
        *channel = mask & (1 << bit) != 0;
    }
    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use erc_modbus::line::share;
    use erc_modbus::SimulatedSlave;

    #[test]
    fn mask_maps_reactor_indices_to_bits() {
        let active: BTreeSet<usize> = [0, 2, 9].into_iter().collect();
        assert_eq!(mask_for_reactors(&active), 0b10_0000_0101);
        assert_eq!(mask_for_reactors(&BTreeSet::new()), 0);
    }

    #[test]
    fn mask_round_trips_through_channel_pattern() {
        let channels = channels_for_mask(0b10_0000_0101);
        assert!(channels[0] && channels[2] && channels[9]);
        assert_eq!(channels.iter().filter(|c| **c).count(), 3);
    }

    #[tokio::test]
    async fn commanded_mask_is_readable_as_coils() {
        let slave = SimulatedSlave::new(1);
        let handle = slave.handle();
        handle.set_coil_mask(0x0000, 0, CHANNEL_COUNT);
        let bank = RelayBank::new(DeviceClient::new(1, share(slave)));

        bank.write_mask(0b101).await.expect("write mask");
        let channels = bank.read_channels().await.expect("read channels");
        assert_eq!(channels, channels_for_mask(0b101));
    }
}
