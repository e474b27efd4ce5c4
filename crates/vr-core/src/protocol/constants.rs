//! PMBus command codes and vendor register addresses.

/// Standard PMBus commands used by the rail adapters.
pub mod pmbus {
    pub const PAGE: u8 = 0x00;
    pub const CLEAR_FAULTS: u8 = 0x03;
    pub const VOUT_MODE: u8 = 0x20;
    pub const VOUT_COMMAND: u8 = 0x21;
    pub const VOUT_MAX: u8 = 0x24;
    pub const VOUT_SCALE_LOOP: u8 = 0x29;
    pub const VOUT_MIN: u8 = 0x2B;
    pub const STATUS_WORD: u8 = 0x79;
    pub const STATUS_VOUT: u8 = 0x7A;
    pub const STATUS_IOUT: u8 = 0x7B;
    pub const STATUS_INPUT: u8 = 0x7C;
    pub const STATUS_TEMPERATURE: u8 = 0x7D;
    pub const STATUS_CML: u8 = 0x7E;
    pub const READ_VOUT: u8 = 0x8B;
    pub const READ_IOUT: u8 = 0x8C;
    pub const READ_TEMPERATURE_1: u8 = 0x8D;
    pub const READ_POUT: u8 = 0x96;
    pub const MFR_ID: u8 = 0x99;
    pub const IC_DEVICE_ID: u8 = 0xAD;
}

/// Registers and constants specific to MPS multi-phase controllers.
pub mod mps {
    pub const PAGE_0: u8 = 0x00;
    pub const PAGE_1: u8 = 0x01;
    pub const PAGE_2: u8 = 0x02;

    /// "MPS" in ASCII, stored after a one byte pad at MFR_ID.
    pub const VENDOR_ID: u32 = 0x4D_50_53;
    /// STORE_USER_CODE, commits user registers to MTP.
    pub const STORE: u8 = 0x17;
    /// Expected user CRC, used as the configuration revision.
    pub const USER_CRC: u8 = 0xF0;

    pub const MP2891_DEVICE_ID_REG: u8 = 0x93;
    pub const MP2891_DEVICE_ID: u16 = 0x2891;
    pub const MP2891_LOOP_CTRL: u8 = 0xBD;
    pub const MP2891_IOUT_RPT: u8 = 0x65;
    pub const MP2891_MAX_RECORDS: usize = 720;

    pub const MP29816A_DEVICE_ID_REG: u8 = 0x1D;
    pub const MP29816A_DEVICE_ID: u16 = 0xA816;
    pub const MP29816A_MAX_RECORDS: usize = 1024;
}

/// Renesas digital multiphase registers.
pub mod renesas {
    /// DMA address register: the next DMA data access targets this address.
    pub const DMA_ADDRESS: u8 = 0xC7;
    /// DMA data register.
    pub const DMA_DATA: u8 = 0xC5;
    /// Configuration CRC of the programmed NVM image.
    pub const DMA_CRC: u16 = 0x003F;
    /// Remaining NVM programming slots.
    pub const DMA_NVM_SLOTS: u16 = 0x00C2;
    pub const RAA228249_DEVICE_ID: u32 = 0x49D2_8100;
}

/// PECI RdPkgConfig command and indices.
pub mod peci {
    pub const RD_PKG_CONFIG: u8 = 0xA1;
    pub const RESPONSE_LEN: usize = 5;

    pub const CC_SUCCESS: u8 = 0x40;
    pub const CC_ILLEGAL_REQUEST: u8 = 0x90;

    pub const IDX_PKG_TEMP: u8 = 0x02;
    pub const IDX_PKG_ENERGY: u8 = 0x03;
    pub const IDX_DIMM_TEMP: u8 = 0x0E;
    pub const IDX_TJMAX: u8 = 0x10;
    pub const IDX_PWR_SKU_UNIT: u8 = 0x1E;
    pub const IDX_RUN_TIME: u8 = 0x1F;

    pub const PARAM_PKG: u16 = 0x00FF;

    pub const DIMM_CHANNELS: u8 = 8;
    pub const DIMM_SLOTS: u8 = 2;
}
