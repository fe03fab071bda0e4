/*!
    This module expose the standard EEPROM registers. registers are defined as [Field]s in the EEPROM, which content can be accessed using the instance of [Sii](crate::sii::Sii) (Slave Information Interface) proper to each slave.

    ETG.1000.6 5.4
*/

use crate::data::{self, Field};
use bilge::prelude::*;


pub const WORD: usize = core::mem::size_of::<u16>();


//  ETG.1000.6 5.4 table 16

/// Alias Address
pub const address_alias: Field<u16> = Field::simple(WORD*0x0004);

pub mod device {
    use super::*;

    pub const vendor: Field<u32> = Field::simple(WORD*0x0008);
    pub const product: Field<u32> = Field::simple(WORD*0x000a);
    pub const revision: Field<u32> = Field::simple(WORD*0x000c);
    pub const serial_number: Field<u32> = Field::simple(WORD*0x000e);
}

pub mod mailbox {
    use super::*;

    /// mailbox recommended parameters during other slave states than bootstrap
    pub mod standard {
        use super::*;
        pub mod receive {
            use super::*;

            /// Receive Mailbox Offset for Standard state (master to slave)
            pub const offset: Field<u16> = Field::simple(WORD*0x0018);
            /// Receive Mailbox Size for Standard state (master to slave)
            pub const size: Field<u16> = Field::simple(WORD*0x0019);
        }
        pub mod send {
            use super::*;

            /// Send Mailbox Offset for Standard state (slave to master)
            pub const offset: Field<u16> = Field::simple(WORD*0x001a);
            /// Send Mailbox Size for Standard state (slave to master)
            pub const size: Field<u16> = Field::simple(WORD*0x001b);
        }
    }
    /// Mailbox Protocols Supported as defined in ETG.1000.6 Table 18
    pub const protocols: Field<MailboxTypes> = Field::simple(WORD*0x001c);
}

/// byte address of the first category header, categories are following each other until [category::END]
pub const categories: usize = WORD*0x0040;


/// ETG.1000.6 table 18
#[bitsize(8)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq)]
pub struct MailboxTypes {
    /// ADS over EtherCAT (routing and parallel services)
    pub ads: bool,
    /// Ethernet over EtherCAT (tunnelling of Data Link services)
    pub ethernet: bool,
    /// CAN application protocol over EtherCAT (access to SDO)
    pub can: bool,
    /// File Access over EtherCAT
    pub file: bool,
    /// Servo Drive Profile over EtherCAT
    pub servo: bool,
    /// Vendor specific protocol over EtherCAT
    pub specific: bool,
    reserved: u2,
}
data::bilge_pdudata!(MailboxTypes, u8);


/// header for a SII category
#[bitsize(32)]
#[derive(FromBits, DebugBits, Copy, Clone)]
pub struct CategoryHeader {
    /// Category Type as defined in ETG.1000.6 Table 19, see [category]
    pub category: u15,
    /// Vendor Specific
    pub specific: bool,
    /// Following Category Word Size
    pub size: u16,
}
data::bilge_pdudata!(CategoryHeader, u32);

/// types of category in the SII, ETG.1000.6 Table 19
pub mod category {
    pub const NOP: u16 = 0;
    /// String repository for other Categories
    pub const STRINGS: u16 = 10;
    /// General information
    pub const GENERAL: u16 = 30;
    /// FMMUs to be used
    pub const FMMU: u16 = 40;
    /// Sync Manager Configuration, a sequence of [CategorySyncManager](super::CategorySyncManager)
    pub const SYNC_MANAGER: u16 = 41;
    pub const TX_PDO: u16 = 50;
    pub const RX_PDO: u16 = 51;
    /// mark the end of SII categories
    pub const END: u16 = 0x7fff;
}

/// ETG.1000.6 table 24
#[bitsize(64)]
#[derive(FromBits, DebugBits, Copy, Clone)]
pub struct CategorySyncManager {
    /// Origin of Data (see Physical Start Address of SyncM)
    pub address: u16,
    pub length: u16,
    /// Defines Mode of Operation (see Control Register of SyncM)
    pub control: u8,
    /// don't care
    pub status: u8,
    pub enable: bool,
    /// fixed content (info for config tool –SyncMan has fixed content)
    pub fixed_content: bool,
    /// virtual SyncManager (virtual SyncMan – no hardware resource used)
    pub virtual_sync_manager: bool,
    /// opOnly (SyncMan should be enabled only in OP state)
    pub oponly: bool,
    reserved: u4,
    pub usage: SyncManagerUsage,
}
data::bilge_pdudata!(CategorySyncManager, u64);

#[bitsize(8)]
#[derive(FromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum SyncManagerUsage {
    #[fallback]
    Disabled = 0x0,
    MailboxOut = 0x1,
    MailboxIn = 0x2,
    ProcessOut = 0x3,
    ProcessIn = 0x4,
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PduData;

    #[test]
    fn category_entries() {
        let header = CategoryHeader::unpack(&[41, 0, 8, 0]).unwrap();
        assert_eq!(header.category().value(), category::SYNC_MANAGER);
        assert_eq!(header.size(), 8);
        assert_eq!(CategoryHeader::unpack(&[0xff, 0xff, 0, 0]).unwrap().category().value(), category::END);

        let channel = CategorySyncManager::unpack(&[0x00, 0x11, 0x0e, 0x00, 0x64, 0x00, 0x01, 0x03]).unwrap();
        assert_eq!(channel.address(), 0x1100);
        assert_eq!(channel.length(), 14);
        assert!(channel.enable());
        assert_eq!(channel.usage(), SyncManagerUsage::ProcessOut);
        assert_eq!(device::product.byte, 0x14);
    }
}
