/*!
	EtherCAT master driving CiA-402 servodrives over CoE.

	- [Master] brings up the segment, configures the registered devices and keeps a cyclic process data exchange running in its own thread, with recovery of slaves leaving the operational state
	- [Drive] walks the CiA-402 state machine of a servodrive and converts its commands and readings from engineering units
	- [Joint] is a small façade over a drive, for actuated and passive joints

	The lower layers (frames, registers, mailbox, SDO) are public for diagnosis and for implementing other devices.
*/

// field constants of process data records are lowercase, like struct fields
#![allow(non_upper_case_globals)]

pub mod socket;
pub mod data;
pub mod error;
pub mod rawmaster;
pub mod registers;
pub mod eeprom;
pub mod sii;
pub mod mailbox;
pub mod can;
pub mod sdo;
pub mod cia402;
pub mod pdo;
pub mod param;
pub mod config;
pub mod mapping;
pub mod bus;
pub mod network;
pub mod image;
pub mod cycle;
pub mod master;
pub mod drive;
pub mod joint;

pub use crate::data::{PduData, Field};
pub use crate::error::{EthercatError, EthercatResult};
pub use crate::socket::*;
pub use crate::rawmaster::{RawMaster, PduAnswer, SlaveAddress};
pub use crate::registers::{AlState, AlError};
pub use crate::can::SdoAbortCode;
pub use crate::sdo::Sdo;
pub use crate::cia402::{StatusWord, ControlWord, DriveState, DriveFaults, OperationMode};
pub use crate::param::DriveParam;
pub use crate::config::{MasterConfig, DriveConfig};
pub use crate::bus::{Fieldbus, SlaveStatus};
pub use crate::network::EthercatBus;
pub use crate::image::{ProcessImage, ProcessData};
pub use crate::cycle::{SlaveHealth, Supervisor};
pub use crate::master::{Master, Device, ServiceData};
pub use crate::drive::{Drive, DriveResult};
pub use crate::joint::{Joint, JointKind, JointReading};
