/// Trap numbers the MMU hands to the core's exception sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TrapVector {
    InstructionAccessException = 5,
    DataAccessException = 19,
}

impl TrapVector {
    /// Trap raised for a translation fault on an access with this ASI.
    pub fn for_access(is_instruction: bool) -> Self {
        if is_instruction {
            Self::InstructionAccessException
        } else {
            Self::DataAccessException
        }
    }

    pub fn number(self) -> u32 {
        self as u32
    }
}

/// Whether a fault on `asi` must trap. With NF set, only supervisor
/// instruction (ASI 0x9) faults reach the processor; the fault registers
/// are updated either way.
pub fn fault_traps(no_fault: bool, asi: u8) -> bool {
    !no_fault || asi == crate::bus::asi::SUPERVISOR_INSTRUCTION
}
