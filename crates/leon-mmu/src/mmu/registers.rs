/// MMU registers, reachable through ASI 0x19.
///
///   0x000 Control               IMPL[31:28] VER[27:24] ITLB[23:21] DTLB[20:18]
///                               PSZ[17:16] TD[15] ST[14] NF[1] E[0]
///   0x100 Context table pointer CTP[31:2], [1:0] read as zero
///   0x200 Context               context number
///   0x300 Fault status          L[9:8] AT[7:5] FT[4:2] FAV[1] OW[0]
///   0x400 Fault address         faulting virtual address
///
/// Values are kept as plain host integers; conversion to the big-endian
/// bus representation happens in `to_bus` / `from_bus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuRegister {
    Control,
    ContextTablePointer,
    Context,
    FaultStatus,
    FaultAddress,
}

impl MmuRegister {
    /// Decode an ASI 0x19 address.
    pub fn from_offset(addr: u32) -> Option<Self> {
        match addr & 0xF00 {
            0x000 => Some(Self::Control),
            0x100 => Some(Self::ContextTablePointer),
            0x200 => Some(Self::Context),
            0x300 => Some(Self::FaultStatus),
            0x400 => Some(Self::FaultAddress),
            _ => None,
        }
    }

    pub fn offset(self) -> u32 {
        match self {
            Self::Control => 0x000,
            Self::ContextTablePointer => 0x100,
            Self::Context => 0x200,
            Self::FaultStatus => 0x300,
            Self::FaultAddress => 0x400,
        }
    }
}

pub fn to_bus(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

pub fn from_bus(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

// Control register bits
pub const CTRL_E: u32 = 1 << 0;
pub const CTRL_NF: u32 = 1 << 1;
pub const CTRL_ST: u32 = 1 << 14;
pub const CTRL_TD: u32 = 1 << 15;
pub const CTRL_PSZ_SHIFT: u32 = 16;
pub const CTRL_DTLB_SHIFT: u32 = 18;
pub const CTRL_ITLB_SHIFT: u32 = 21;
pub const CTRL_VER_SHIFT: u32 = 24;
/// Software can only change TD, NF and E.
pub const CTRL_WRITABLE: u32 = CTRL_TD | CTRL_NF | CTRL_E;

// Fault status register fields
pub const FSR_OW: u32 = 1 << 0;
pub const FSR_FAV: u32 = 1 << 1;
pub const FSR_FT_SHIFT: u32 = 2;
pub const FSR_AT_SHIFT: u32 = 5;
pub const FSR_L_SHIFT: u32 = 8;

pub type RegisterObserver = Box<dyn FnMut(MmuRegister, u32)>;

pub struct MmuRegisters {
    control: u32,
    context_table_pointer: u32,
    context: u32,
    fault_status: u32,
    fault_address: u32,
    /// Called after every register write (software or internal), with the
    /// value that landed in the register.
    observer: Option<RegisterObserver>,
}

impl MmuRegisters {
    pub fn new(control_reset: u32) -> Self {
        Self {
            control: control_reset,
            context_table_pointer: 0,
            context: 0,
            fault_status: 0,
            fault_address: 0,
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: Option<RegisterObserver>) {
        self.observer = observer;
    }

    fn notify(&mut self, reg: MmuRegister, value: u32) {
        if let Some(observer) = self.observer.as_mut() {
            observer(reg, value);
        }
    }

    pub fn control(&self) -> u32 {
        self.control
    }

    pub fn enabled(&self) -> bool {
        self.control & CTRL_E != 0
    }

    pub fn no_fault(&self) -> bool {
        self.control & CTRL_NF != 0
    }

    pub fn tlb_disabled(&self) -> bool {
        self.control & CTRL_TD != 0
    }

    pub fn write_control(&mut self, val: u32) {
        self.control = (self.control & !CTRL_WRITABLE) | (val & CTRL_WRITABLE);
        log::debug!("MMU control <- {:#010X} ({:#010X})", val, self.control);
        self.notify(MmuRegister::Control, self.control);
    }

    pub fn context_table_pointer(&self) -> u32 {
        self.context_table_pointer
    }

    pub fn write_context_table_pointer(&mut self, val: u32) {
        self.context_table_pointer = val & !0x3;
        log::debug!("MMU context table pointer <- {:#010X}", self.context_table_pointer);
        self.notify(MmuRegister::ContextTablePointer, self.context_table_pointer);
    }

    pub fn context(&self) -> u32 {
        self.context
    }

    pub fn write_context(&mut self, val: u32) {
        self.context = val;
        log::debug!("MMU context <- {}", val);
        self.notify(MmuRegister::Context, val);
    }

    /// Reading the fault status register clears it.
    pub fn read_fault_status(&mut self) -> u32 {
        let val = self.fault_status;
        self.fault_status = 0;
        val
    }

    /// Fault status without the clear-on-read side effect.
    pub fn peek_fault_status(&self) -> u32 {
        self.fault_status
    }

    pub fn fault_address(&self) -> u32 {
        self.fault_address
    }

    /// Latch a fault. The first unacknowledged fault keeps its status;
    /// later ones only set OW.
    pub fn record_fault(&mut self, access_index: u8, code: u32, vaddr: u32, is_data: bool) {
        if self.fault_status == 0 {
            let mut fsr = (u32::from(access_index & 0x7) << FSR_AT_SHIFT) | code;
            if is_data {
                fsr |= FSR_FAV;
                self.fault_address = vaddr;
                self.notify(MmuRegister::FaultAddress, vaddr);
            }
            self.fault_status = fsr;
        } else {
            self.fault_status |= FSR_OW;
        }
        self.notify(MmuRegister::FaultStatus, self.fault_status);
    }

    /// Generic read, as seen through ASI 0x19. Applies read side effects.
    pub fn read(&mut self, reg: MmuRegister) -> u32 {
        let val = match reg {
            MmuRegister::Control => self.control,
            MmuRegister::ContextTablePointer => self.context_table_pointer,
            MmuRegister::Context => self.context,
            MmuRegister::FaultStatus => self.read_fault_status(),
            MmuRegister::FaultAddress => self.fault_address,
        };
        log::debug!("MMU {:?} read: {:#010X}", reg, val);
        val
    }

    /// Generic write, as seen through ASI 0x19. Fault registers are read-only.
    pub fn write(&mut self, reg: MmuRegister, val: u32) {
        match reg {
            MmuRegister::Control => self.write_control(val),
            MmuRegister::ContextTablePointer => self.write_context_table_pointer(val),
            MmuRegister::Context => self.write_context(val),
            MmuRegister::FaultStatus | MmuRegister::FaultAddress => {
                log::debug!("MMU {:?} is read-only, ignoring {:#010X}", reg, val);
            }
        }
    }
}
