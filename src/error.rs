//! definition of the general ethercat error type

use std::sync::Arc;
use thiserror::Error;
use crate::data::PackingError;

/**
    general object reporting an unexpected result regarding ethercat communication

    Its variant are meant to help finding the cause responsible for the problem and how to deal with it.

    [Self::Slave] variant should not be used without an appropriate type for `T`, `T` depend on the operation the slave reports for, and is usually an error code, or an enum.
*/
#[derive(Clone, Debug, Error)]
pub enum EthercatError<T = ()> {
    /// error caused by communication support
    ///
    /// these errors are exterior to this library
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    /// error reported by a slave, its type depend on the operation returning this error
    ///
    /// these errors can generally be handled and fixed by retrying the operation or reconfiguring the slave
    #[error("slave error: {0:?}")]
    Slave(T),

    /// error reported by the master
    ///
    /// these errors can generally be handled and fixed by retrying the operation or using the master differently when the issue is in the user code
    #[error("master error: {0}")]
    Master(&'static str),

    /// error detected by the master in the ethercat communication
    ///
    /// these errors can generally not be fixed and the whole communication has to be restarted
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// error is due to too much time elapsed, but does not compromise the communication
    ///
    /// these errors are generally contextual and the operation can be retried.
    #[error("timeout: {0}")]
    Timeout(&'static str),
}

/// convenient alias to simplify return annotations
pub type EthercatResult<T=(), E=()> = core::result::Result<T, EthercatError<E>>;

impl<T> From<std::io::Error> for EthercatError<T> {
    fn from(src: std::io::Error) -> Self {
        EthercatError::Io(Arc::new(src))
    }
}

impl<T> From<PackingError> for EthercatError<T> {
    fn from(src: PackingError) -> Self {
        EthercatError::Protocol(match src {
            PackingError::BadSize(_, text) => text,
            PackingError::InvalidValue(text) => text,
        })
    }
}

// because rust doesn't allow specialization and already implements `From<T> for T`, we cannot write smart conversions for generic EthercatError<T>, so these are manual conversion methods
impl<E> EthercatError<E> {
    /// convert the error if the slave specific error type allows it
    pub fn into<F>(self) -> EthercatError<F>
    where F: From<E> {
        self.map(|e| F::from(e))
    }
    /// convert the error with a callback handling the case of slave-specific error
    pub fn map<F,T>(self, callback: F) -> EthercatError<T>
    where F: FnOnce(E) -> T
    {
        match self {
            EthercatError::Slave(value) => EthercatError::Slave(callback(value)),
            EthercatError::Io(e) => EthercatError::Io(e),
            EthercatError::Master(message) => EthercatError::Master(message),
            EthercatError::Protocol(message) => EthercatError::Protocol(message),
            EthercatError::Timeout(message) => EthercatError::Timeout(message),
        }
    }
    /// drop the slave-specific part of the error, the slave error is reported with the given message
    pub fn forget(self, message: &'static str) -> EthercatError {
        match self {
            EthercatError::Slave(_) => EthercatError::Master(message),
            EthercatError::Io(e) => EthercatError::Io(e),
            EthercatError::Master(message) => EthercatError::Master(message),
            EthercatError::Protocol(message) => EthercatError::Protocol(message),
            EthercatError::Timeout(message) => EthercatError::Timeout(message),
        }
    }
}
impl EthercatError<()> {
    /// convert an error with no slave-specific type into an error with any slave-specific type
    pub fn upgrade<F>(self) -> EthercatError<F> {
        match self {
            EthercatError::Slave(()) => EthercatError::Master("slave reported an error without detail"),
            EthercatError::Io(e) => EthercatError::Io(e),
            EthercatError::Master(message) => EthercatError::Master(message),
            EthercatError::Protocol(message) => EthercatError::Protocol(message),
            EthercatError::Timeout(message) => EthercatError::Timeout(message),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let io: EthercatError = std::io::Error::new(std::io::ErrorKind::NotFound, "no such interface").into();
        assert_eq!(io.to_string(), "io error: no such interface");
        assert_eq!(EthercatError::<()>::Master("bus closed").to_string(), "master error: bus closed");
        assert_eq!(EthercatError::<u16>::Slave(0x1b).to_string(), "slave error: 27");
        assert_eq!(EthercatError::<()>::Timeout("state change").to_string(), "timeout: state change");
    }

    #[test]
    fn conversions() {
        let error = EthercatError::<u8>::Slave(3).into::<u32>();
        assert!(matches!(error, EthercatError::Slave(3u32)));
        let error = EthercatError::<u8>::Slave(3).forget("drive fault");
        assert!(matches!(error, EthercatError::Master("drive fault")));
        let error: EthercatError<u32> = EthercatError::<()>::Protocol("wrong working counter").upgrade();
        assert!(matches!(error, EthercatError::Protocol("wrong working counter")));
        let packing: EthercatError = PackingError::InvalidValue("bad state").into();
        assert!(matches!(packing, EthercatError::Protocol("bad state")));
    }
}
