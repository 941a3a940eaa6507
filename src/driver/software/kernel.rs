// Host compute kernels
//
// The software driver can't run shader code, so compute sources are paired with
// a Rust closure that performs one invocation. The closure sees the program's
// uniforms by name and the storage buffers by binding index.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use bytemuck::Pod;
use glam::UVec3;

/// Built-in inputs of one compute invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    pub global_id: UVec3,
    pub local_id: UVec3,
    pub group_id: UVec3,
    pub group_size: UVec3,
    /// Flattened index of `local_id` inside its group
    pub local_index: u32,
}

impl Invocation {
    /// Invocation index flattened across the whole dispatch along x
    pub fn linear_index(&self) -> usize {
        (self.local_index + self.group_id.x * self.group_size.x * self.group_size.y * self.group_size.z) as usize
    }
}

pub type Kernel = Rc<dyn Fn(&Invocation, &mut KernelIo<'_>)>;

/// Last uploaded value of a uniform
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Int(Vec<i32>),
    UInt(Vec<u32>),
    Float(Vec<f32>),
}

/// Scratch copy of a storage buffer while a dispatch runs
pub(crate) struct StorageSlot {
    pub(crate) words: Vec<u64>,
    pub(crate) len: usize,
}

impl StorageSlot {
    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }
}

/// Resources visible to a kernel invocation.
///
/// Out-of-range loads read zero and out-of-range stores are dropped, matching
/// robust buffer access.
pub struct KernelIo<'a> {
    pub(crate) uniforms: &'a HashMap<String, UniformValue>,
    pub(crate) slots: &'a mut [StorageSlot],
    pub(crate) bindings: &'a BTreeMap<u32, usize>,
}

impl KernelIo<'_> {
    pub fn uniform_i32(&self, name: &str) -> Option<i32> {
        match self.uniforms.get(name)? {
            UniformValue::Int(v) => v.first().copied(),
            UniformValue::UInt(v) => v.first().map(|&x| x as i32),
            UniformValue::Float(_) => None,
        }
    }

    pub fn uniform_u32(&self, name: &str) -> Option<u32> {
        match self.uniforms.get(name)? {
            UniformValue::UInt(v) => v.first().copied(),
            UniformValue::Int(v) => v.first().map(|&x| x as u32),
            UniformValue::Float(_) => None,
        }
    }

    pub fn uniform_f32(&self, name: &str) -> Option<f32> {
        match self.uniforms.get(name)? {
            UniformValue::Float(v) => v.first().copied(),
            _ => None,
        }
    }

    /// Number of whole `T` elements in the buffer at `binding`
    pub fn len<T: Pod>(&self, binding: u32) -> usize {
        self.slot(binding).map_or(0, |s| s.len / std::mem::size_of::<T>())
    }

    pub fn load<T: Pod>(&self, binding: u32, index: usize) -> T {
        let size = std::mem::size_of::<T>();
        let start = index * size;
        match self.slot(binding).and_then(|s| s.bytes().get(start..start + size)) {
            Some(bytes) => bytemuck::pod_read_unaligned(bytes),
            None => T::zeroed(),
        }
    }

    pub fn store<T: Pod>(&mut self, binding: u32, index: usize, value: T) {
        let size = std::mem::size_of::<T>();
        let start = index * size;
        let Some(&slot) = self.bindings.get(&binding) else { return };
        if let Some(dst) = self.slots[slot].bytes_mut().get_mut(start..start + size) {
            dst.copy_from_slice(bytemuck::bytes_of(&value));
        }
    }

    fn slot(&self, binding: u32) -> Option<&StorageSlot> {
        self.bindings.get(&binding).map(|&i| &self.slots[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_stores_by_binding() {
        let uniforms = HashMap::from([("k".to_string(), UniformValue::Int(vec![3]))]);
        let mut slots = vec![StorageSlot { words: vec![0; 2], len: 16 }];
        let bindings = BTreeMap::from([(4, 0)]);
        let mut io = KernelIo { uniforms: &uniforms, slots: &mut slots, bindings: &bindings };

        io.store::<i32>(4, 1, 7);
        io.store::<i32>(4, 9, 1); // out of range, dropped
        assert_eq!(io.load::<i32>(4, 1), 7);
        assert_eq!(io.load::<i32>(4, 9), 0);
        assert_eq!(io.load::<i32>(5, 0), 0);
        assert_eq!(io.len::<i32>(4), 4);
        assert_eq!(io.uniform_i32("k"), Some(3));
        assert_eq!(io.uniform_f32("k"), None);
    }

    #[test]
    fn linear_index_spans_groups() {
        let inv = Invocation {
            global_id: UVec3::new(9, 0, 0),
            local_id: UVec3::new(1, 0, 0),
            group_id: UVec3::new(2, 0, 0),
            group_size: UVec3::new(4, 1, 1),
            local_index: 1,
        };
        assert_eq!(inv.linear_index(), 9);
    }
}
