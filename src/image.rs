/*!
	process image shared between the cyclic exchange and the devices

	The image is split in two arenas, one per direction, each behind its own lock. The cyclic thread only holds a lock for the time of a copy, and devices only hold it to read or write their fields, so a multi-field write of a device is never half sent.

	Once the master stops exchanging it, the image is invalidated and every access through a [ProcessData] fails.
*/

use core::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, atomic::{AtomicBool, Ordering}};
use crate::{
	data::{PduData, Field},
	mapping::SlaveLayout,
	error::{EthercatError, EthercatResult},
	};


/// outputs and inputs of all slaves, as laid out in the logical memory
#[derive(Debug)]
pub struct ProcessImage {
	outputs: Mutex<Vec<u8>>,
	inputs: Mutex<Vec<u8>>,
	valid: AtomicBool,
}
impl ProcessImage {
	/// zeroed image of the given sizes
	pub fn new(outputs: usize, inputs: usize) -> Self {
		Self {
			outputs: Mutex::new(vec![0; outputs]),
			inputs: Mutex::new(vec![0; inputs]),
			valid: AtomicBool::new(true),
		}
	}
	/// the image is still exchanged with the slaves
	pub fn is_valid(&self) -> bool  {self.valid.load(Ordering::SeqCst)}
	/// mark the image as no longer exchanged, further accesses of the slaves data fail
	pub fn invalidate(&self)  {self.valid.store(false, Ordering::SeqCst)}
	pub fn outputs_len(&self) -> usize  {lock(&self.outputs).len()}
	pub fn inputs_len(&self) -> usize  {lock(&self.inputs).len()}

	/// copy the whole output image, for sending
	pub fn read_outputs(&self, dst: &mut [u8]) {
		dst.copy_from_slice(&lock(&self.outputs));
	}
	/// replace the whole input image with received data
	pub fn write_inputs(&self, src: &[u8]) {
		lock(&self.inputs).copy_from_slice(src);
	}
}

/// the image stays usable even if a thread panicked while holding it, its content is plain bytes
fn lock(arena: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
	arena.lock().unwrap_or_else(PoisonError::into_inner)
}


/**
	handle to the process data of one slave in the [ProcessImage]

	Fields given to its methods are relative to the slave's data, not to the image.
*/
#[derive(Clone, Debug)]
pub struct ProcessData {
	image: Arc<ProcessImage>,
	outputs: Range<usize>,
	inputs: Range<usize>,
}
impl ProcessData {
	pub fn new(image: Arc<ProcessImage>, layout: SlaveLayout) -> Self {
		Self {image, outputs: layout.outputs, inputs: layout.inputs}
	}
	/// byte range of the slave outputs in the output image
	pub fn outputs_range(&self) -> Range<usize>  {self.outputs.clone()}
	/// byte range of the slave inputs in the input image
	pub fn inputs_range(&self) -> Range<usize>  {self.inputs.clone()}

	/// the image is still exchanged with the slaves
	pub fn is_valid(&self) -> bool  {self.image.is_valid()}
	fn check(&self) -> EthercatResult {
		if self.image.is_valid()  {Ok(())}
		else  {Err(EthercatError::Master("process data not mapped"))}
	}

	/// read a value in the last received inputs
	pub fn get<T: PduData>(&self, field: Field<T>) -> EthercatResult<T> {
		self.check()?;
		let inputs = lock(&self.image.inputs);
		Ok(field.try_get(slice(&inputs, &self.inputs)?)?)
	}
	/// read a value in the outputs to be sent
	pub fn get_output<T: PduData>(&self, field: Field<T>) -> EthercatResult<T> {
		self.check()?;
		let outputs = lock(&self.image.outputs);
		Ok(field.try_get(slice(&outputs, &self.outputs)?)?)
	}
	/// write a value in the outputs to be sent
	pub fn set<T: PduData>(&self, field: Field<T>, value: T) -> EthercatResult {
		self.with_outputs(|outputs| field.try_set(outputs, value))??;
		Ok(())
	}
	/**
		give access to the slave outputs for several reads and writes

		the cyclic exchange cannot send the outputs while the closure runs, so it must be short
	*/
	pub fn with_outputs<R>(&self, operation: impl FnOnce(&mut [u8]) -> R) -> EthercatResult<R> {
		self.check()?;
		let mut outputs = lock(&self.image.outputs);
		let data = outputs.get_mut(self.outputs.clone())
			.ok_or(EthercatError::Master("slave data out of the process image"))?;
		Ok(operation(data))
	}
	/// copy of the last received inputs
	pub fn inputs(&self) -> EthercatResult<Vec<u8>> {
		self.check()?;
		let inputs = lock(&self.image.inputs);
		Ok(slice(&inputs, &self.inputs)?.to_vec())
	}
	/// copy of the outputs to be sent
	pub fn outputs(&self) -> EthercatResult<Vec<u8>> {
		self.check()?;
		let outputs = lock(&self.image.outputs);
		Ok(slice(&outputs, &self.outputs)?.to_vec())
	}
}

fn slice<'a>(arena: &'a [u8], range: &Range<usize>) -> EthercatResult<&'a [u8]> {
	arena.get(range.clone()).ok_or(EthercatError::Master("slave data out of the process image"))
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn slave_slices() {
		let image = Arc::new(ProcessImage::new(8, 6));
		let first = ProcessData::new(image.clone(), SlaveLayout {outputs: 0 .. 4, inputs: 0 .. 2});
		let second = ProcessData::new(image.clone(), SlaveLayout {outputs: 4 .. 8, inputs: 2 .. 6});

		second.set(Field::<u32>::simple(0), 0x0403_0201).unwrap();
		first.set(Field::<u16>::simple(2), 0xbeef).unwrap();
		let mut outputs = [0; 8];
		image.read_outputs(&mut outputs);
		assert_eq!(outputs, [0, 0, 0xef, 0xbe, 1, 2, 3, 4]);
		assert_eq!(second.get_output(Field::<u8>::simple(3)).unwrap(), 4);

		image.write_inputs(&[1, 0, 5, 0, 0, 0]);
		assert_eq!(first.get(Field::<u16>::simple(0)).unwrap(), 1);
		assert_eq!(second.get(Field::<i32>::simple(0)).unwrap(), 5);
		assert_eq!(second.inputs().unwrap(), vec![5, 0, 0, 0]);
		// out of the slave's own data
		assert!(first.get(Field::<u32>::simple(0)).is_err());
		assert!(first.set(Field::<u8>::simple(4), 1).is_err());
	}

	#[test]
	fn grouped_writes() {
		let image = Arc::new(ProcessImage::new(4, 0));
		let data = ProcessData::new(image.clone(), SlaveLayout {outputs: 0 .. 4, inputs: 0 .. 0});
		let previous = data.with_outputs(|outputs| {
			let previous = outputs[0];
			outputs.copy_from_slice(&[9, 8, 7, 6]);
			previous
		}).unwrap();
		assert_eq!(previous, 0);
		assert_eq!(data.outputs().unwrap(), vec![9, 8, 7, 6]);
	}

	#[test]
	fn invalidated() {
		let image = Arc::new(ProcessImage::new(2, 2));
		let data = ProcessData::new(image.clone(), SlaveLayout {outputs: 0 .. 2, inputs: 0 .. 2});
		data.set(Field::<u16>::simple(0), 7).unwrap();
		image.invalidate();
		assert!(! data.is_valid());
		assert!(data.get(Field::<u16>::simple(0)).is_err());
		assert!(data.set(Field::<u16>::simple(0), 8).is_err());
		assert!(data.with_outputs(|_| ()).is_err());
		assert!(data.outputs().is_err());
		// the cyclic side is unaffected
		let mut outputs = [0; 2];
		image.read_outputs(&mut outputs);
		assert_eq!(outputs, [7, 0]);
	}
}
