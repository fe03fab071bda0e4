/*!
    implementation of the Slave Information Interface (SII) to read a slave's EEPROM memory

    The EEPROM fields are declared in [crate::eeprom]
*/

use std::time::{Duration, Instant};
use crate::{
    data::{PduData, Field, Storage},
    rawmaster::RawMaster,
    registers,
    eeprom::{self, WORD, CategoryHeader, CategorySyncManager},
    error::{EthercatError, EthercatResult},
    };

/// maximum time an EEPROM read is expected to take
const SII_TIMEOUT: Duration = Duration::from_millis(20);
/// the category walk stops after this word address, protecting against corrupted EEPROMs
const MAX_WORD: usize = 0x4000;


/// reader of the slave EEPROM, through the SII registers of a slave addressed by its station address
pub struct Sii<'a> {
    master: &'a RawMaster,
    slave: u16,
}
impl<'a> Sii<'a> {
    /// take the EEPROM control from the slave PDI, and return a reader to it
    pub fn new(master: &'a RawMaster, slave: u16) -> EthercatResult<Self> {
        master.fpwr(slave, registers::sii::access, registers::SiiAccess::from(0u16))?.one()?;
        Ok(Self {master, slave})
    }

    /// read data from the slave's EEPROM, the field shall be word aligned
    pub fn read<T: PduData>(&self, field: Field<T>) -> EthercatResult<T> {
        let mut buffer = T::Packed::zeroed();
        let data = buffer.as_mut();
        let mut position = 0;
        while position < field.len.min(data.len()) {
            let chunk = self.read_word((field.byte + position) / WORD)?;
            let size = chunk.len().min(data.len() - position);
            data[position .. position + size].copy_from_slice(&chunk[.. size]);
            position += size;
        }
        Ok(T::unpack(buffer.as_ref())?)
    }

    /// read 4 bytes from the given word address
    fn read_word(&self, word: usize) -> EthercatResult<[u8; 4]> {
        let address = u16::try_from(word)
            .map_err(|_| EthercatError::Master("EEPROM address out of range"))?;
        let control = self.wait_idle()?;
        if control.command_error() || control.write_error() {
            // clear the error bits of a previous request
            self.master.fpwr(self.slave, registers::sii::control, registers::SiiControl::from(0u16))?.one()?;
        }
        self.master.fpwr(self.slave, registers::sii::address, address)?.one()?;
        let mut request = registers::SiiControl::from(0u16);
        request.set_read_operation(true);
        self.master.fpwr(self.slave, registers::sii::control, request)?.one()?;

        let control = self.wait_idle()?;
        if control.command_error()
            {return Err(EthercatError::Protocol("SII read command refused"))}
        self.master.fprd(self.slave, registers::sii::data)?.one()
    }

    /// poll the SII control register until no operation is ongoing
    fn wait_idle(&self) -> EthercatResult<registers::SiiControl> {
        let deadline = Instant::now() + SII_TIMEOUT;
        loop {
            let control = self.master.fprd(self.slave, registers::sii::control)?.one()?;
            if ! control.busy() && ! control.read_operation()
                {return Ok(control)}
            if Instant::now() > deadline
                {return Err(EthercatError::Timeout("SII stays busy"))}
        }
    }

    /// return the sync manager channels described in the EEPROM categories
    pub fn sync_managers(&self) -> EthercatResult<Vec<CategorySyncManager>> {
        let mut channels = Vec::new();
        let mut word = eeprom::categories / WORD;
        while word < MAX_WORD {
            let header: CategoryHeader = self.read(Field::simple(word * WORD))?;
            let category = header.category().value();
            if category == eeprom::category::END
                {break}
            let start = word + CategoryHeader::packed_size() / WORD;
            if category == eeprom::category::SYNC_MANAGER {
                let count = usize::from(header.size()) * WORD / CategorySyncManager::packed_size();
                for index in 0 .. count {
                    channels.push(self.read(Field::<CategorySyncManager>::simple(
                        start * WORD + index * CategorySyncManager::packed_size()
                        ))?);
                }
            }
            word = start + usize::from(header.size());
        }
        Ok(channels)
    }
}
