use tracing::trace;

use super::error::CodegenError;
use super::instruction::Register;

/// First-fit pool over a fixed set of general registers.
#[derive(Debug)]
pub struct RegisterPool {
    in_use: Vec<bool>,
}

impl RegisterPool {
    pub fn new(size: usize) -> Self {
        Self {
            in_use: vec![false; size.min(usize::from(u8::MAX) + 1)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.in_use.len()
    }

    pub fn allocate(&mut self) -> Result<Register, CodegenError> {
        let index = self
            .in_use
            .iter()
            .position(|used| !used)
            .ok_or(CodegenError::RegistersExhausted {
                available: self.capacity(),
            })?;
        self.in_use[index] = true;
        let register = Register::General(index as u8);
        trace!(%register, "allocate");
        Ok(register)
    }

    /// Releasing a register that is not in use does nothing.
    pub fn release(&mut self, register: Register) {
        if let Register::General(index) = register
            && let Some(slot) = self.in_use.get_mut(usize::from(index))
        {
            trace!(%register, "release");
            *slot = false;
        }
    }

    pub fn live(&self) -> Vec<Register> {
        self.in_use
            .iter()
            .enumerate()
            .filter(|(_, used)| **used)
            .map(|(index, _)| Register::General(index as u8))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        !self.in_use.contains(&true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_first_free_register() {
        let mut pool = RegisterPool::new(3);
        let r0 = pool.allocate().expect("r0");
        let r1 = pool.allocate().expect("r1");
        assert_eq!((r0, r1), (Register::General(0), Register::General(1)));

        pool.release(r0);
        assert_eq!(pool.allocate().expect("reuse"), Register::General(0));
        assert_eq!(pool.live(), vec![Register::General(0), Register::General(1)]);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut pool = RegisterPool::new(2);
        pool.allocate().expect("r0");
        pool.allocate().expect("r1");
        assert_eq!(
            pool.allocate(),
            Err(CodegenError::RegistersExhausted { available: 2 })
        );
    }

    #[test]
    fn double_release_is_a_no_op() {
        let mut pool = RegisterPool::new(2);
        let register = pool.allocate().expect("r0");
        pool.release(register);
        pool.release(register);
        pool.release(Register::Return);
        pool.release(Register::General(7));
        assert!(pool.is_empty());
        assert_eq!(pool.allocate().expect("r0"), Register::General(0));
    }
}
