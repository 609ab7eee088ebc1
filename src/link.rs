//! Device link table (component C2).
//!
//! The original driver keeps one `devLink server` plus a fixed
//! `linkPrimary primary[NUM_GPIB_ADDRESSES]` array, each primary address
//! holding its own secondary-address sub-array, all allocated once at port
//! creation (`drvVxi11.c:vxiCreatePort`). This is realized here as a
//! fixed-size arena rather than a `HashMap<GpibAddr, DeviceLink>` — no
//! link is ever allocated or freed at runtime, only opened and closed.

use crate::codes::NUM_GPIB_ADDRESSES;
use crate::error::{Error, Result};

/// A GPIB primary/secondary address, or the special server (`inst0`) link.
///
/// `addr == -1` in the original selects the server link; primary addresses
/// run `0..NUM_GPIB_ADDRESSES`, each optionally qualified by a secondary
/// address in the same range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpibAddr {
    Server,
    Primary(u8),
    Secondary(u8, u8),
}

impl GpibAddr {
    /// Decodes the `(primary, secondary)` pair the Port Manager passes
    /// upward, where `secondary < 0` (modeled here as `None`) means no
    /// secondary addressing and `primary < 0` means the server link.
    pub fn decode(primary: i32, secondary: Option<i32>) -> Result<Self> {
        if primary < 0 {
            return Ok(Self::Server);
        }
        let primary = check_addr(primary)?;
        match secondary {
            None => Ok(Self::Primary(primary)),
            Some(s) if s < 0 => Ok(Self::Primary(primary)),
            Some(s) => Ok(Self::Secondary(primary, check_addr(s)?)),
        }
    }

    pub fn primary(&self) -> Option<u8> {
        match self {
            Self::Server => None,
            Self::Primary(p) | Self::Secondary(p, _) => Some(*p),
        }
    }

    pub fn secondary(&self) -> Option<u8> {
        match self {
            Self::Secondary(_, s) => Some(*s),
            _ => None,
        }
    }
}

fn check_addr(addr: i32) -> Result<u8> {
    if addr < 0 || addr as usize >= NUM_GPIB_ADDRESSES {
        return Err(Error::InvalidAddress(addr));
    }
    Ok(addr as u8)
}

/// Builds the VXI-11 device name `create_link` expects: `"<vxi_name>"` for
/// the server link, `"<vxi_name>,<primary>"` or
/// `"<vxi_name>,<primary>,<secondary>"` otherwise (`drvVxi11.c:vxiCreateDevLink`).
pub fn device_name(vxi_name: &str, addr: GpibAddr) -> String {
    match addr {
        GpibAddr::Server => vxi_name.to_string(),
        GpibAddr::Primary(p) => format!("{vxi_name},{p}"),
        GpibAddr::Secondary(p, s) => format!("{vxi_name},{p},{s}"),
    }
}

/// Per-address link state, mirroring the original's `devLink` record.
#[derive(Debug, Clone, Default)]
pub struct DeviceLink {
    /// `lid` from `create_link`; `None` means the link is not open.
    pub lid: Option<i32>,
    pub connected: bool,
    /// End-of-string character, if one has been set via `setEos`.
    pub eos: Option<u8>,
    pub max_recv_size: u32,
    pub abort_port: u16,
}

impl DeviceLink {
    pub fn is_open(&self) -> bool {
        self.lid.is_some()
    }
}

/// Fixed-size table of every link a port can hold open at once: one server
/// link plus one slot per primary/secondary address pair.
pub struct LinkTable {
    server: DeviceLink,
    primary: [DeviceLink; NUM_GPIB_ADDRESSES],
    secondary: [[DeviceLink; NUM_GPIB_ADDRESSES]; NUM_GPIB_ADDRESSES],
}

impl Default for LinkTable {
    fn default() -> Self {
        Self {
            server: DeviceLink::default(),
            primary: std::array::from_fn(|_| DeviceLink::default()),
            secondary: std::array::from_fn(|_| std::array::from_fn(|_| DeviceLink::default())),
        }
    }
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: GpibAddr) -> &DeviceLink {
        match addr {
            GpibAddr::Server => &self.server,
            GpibAddr::Primary(p) => &self.primary[p as usize],
            GpibAddr::Secondary(p, s) => &self.secondary[p as usize][s as usize],
        }
    }

    pub fn get_mut(&mut self, addr: GpibAddr) -> &mut DeviceLink {
        match addr {
            GpibAddr::Server => &mut self.server,
            GpibAddr::Primary(p) => &mut self.primary[p as usize],
            GpibAddr::Secondary(p, s) => &mut self.secondary[p as usize][s as usize],
        }
    }

    /// Clears every open link, e.g. when the RPC connection itself drops
    /// (`drvVxi11.c:vxiDisconnectPort` invalidates all device links).
    pub fn clear_all(&mut self) {
        self.server = DeviceLink::default();
        for slot in &mut self.primary {
            *slot = DeviceLink::default();
        }
        for row in &mut self.secondary {
            for slot in row {
                *slot = DeviceLink::default();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_server_link_from_negative_primary() {
        assert_eq!(GpibAddr::decode(-1, None).unwrap(), GpibAddr::Server);
    }

    #[test]
    fn decodes_primary_only() {
        assert_eq!(GpibAddr::decode(5, None).unwrap(), GpibAddr::Primary(5));
        assert_eq!(GpibAddr::decode(5, Some(-1)).unwrap(), GpibAddr::Primary(5));
    }

    #[test]
    fn decodes_primary_and_secondary() {
        assert_eq!(
            GpibAddr::decode(3, Some(12)).unwrap(),
            GpibAddr::Secondary(3, 12)
        );
    }

    #[test]
    fn rejects_out_of_range_address() {
        assert!(GpibAddr::decode(31, None).is_err());
        assert!(GpibAddr::decode(3, Some(31)).is_err());
    }

    #[test]
    fn device_name_matches_original_formatting() {
        assert_eq!(device_name("inst0", GpibAddr::Server), "inst0");
        assert_eq!(device_name("gpib0", GpibAddr::Primary(9)), "gpib0,9");
        assert_eq!(
            device_name("gpib0", GpibAddr::Secondary(9, 12)),
            "gpib0,9,12"
        );
    }

    #[test]
    fn link_table_slots_are_independent() {
        let mut table = LinkTable::new();
        table.get_mut(GpibAddr::Primary(2)).lid = Some(7);
        assert!(table.get(GpibAddr::Primary(2)).is_open());
        assert!(!table.get(GpibAddr::Primary(3)).is_open());
        assert!(!table.get(GpibAddr::Server).is_open());
    }

    #[test]
    fn clear_all_resets_every_slot() {
        let mut table = LinkTable::new();
        table.get_mut(GpibAddr::Server).lid = Some(1);
        table.get_mut(GpibAddr::Secondary(4, 5)).lid = Some(2);
        table.clear_all();
        assert!(!table.get(GpibAddr::Server).is_open());
        assert!(!table.get(GpibAddr::Secondary(4, 5)).is_open());
    }
}
