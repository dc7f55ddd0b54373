//! Per-model command tables
//!
//! Each supported model gets one static [`ModelTable`]. The table says which
//! frame layout and header bytes a logical command uses and where
//! configuration values land inside template payloads. [`CommandBuilder`]
//! turns a table entry plus configuration into a [`Frame`].

use civintec_types::{DeviceModel, SoundPattern, WiegandConfig};

use crate::{
    constants::DEFAULT_STATUS,
    error::{Error, Result},
    frame::{Frame, FrameCodec, FrameVariant},
};

/// Header bytes of one logical command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandLayout {
    Normal { cmd: u8 },
    Extended { high: u8, low: u8 },
    Ee { cmd: u16 },
}

/// Static description of one logical command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Manufacturer command name; its length is the default DATALEN
    pub name: &'static str,
    pub layout: CommandLayout,
    /// Explicit DATALEN, overriding the name-length default
    pub datalen: Option<u8>,
}

impl CommandSpec {
    pub const fn normal(name: &'static str, cmd: u8, datalen: Option<u8>) -> Self {
        Self {
            name,
            layout: CommandLayout::Normal { cmd },
            datalen,
        }
    }

    pub const fn extended(name: &'static str, high: u8, low: u8, datalen: Option<u8>) -> Self {
        Self {
            name,
            layout: CommandLayout::Extended { high, low },
            datalen,
        }
    }

    pub const fn ee(name: &'static str, cmd: u16, datalen: Option<u8>) -> Self {
        Self {
            name,
            layout: CommandLayout::Ee { cmd },
            datalen,
        }
    }

    pub fn variant(&self) -> FrameVariant {
        match self.layout {
            CommandLayout::Normal { .. } => FrameVariant::Normal,
            CommandLayout::Extended { .. } => FrameVariant::Extended,
            CommandLayout::Ee { .. } => FrameVariant::Ee,
        }
    }

    /// Encode this command with `data`, consuming one sequence number
    pub fn encode(&self, codec: &FrameCodec, data: &[u8]) -> Frame {
        match self.layout {
            CommandLayout::Normal { cmd } => codec.encode_normal(self.name, cmd, data, self.datalen),
            CommandLayout::Extended { high, low } => {
                codec.encode_extended(self.name, high, low, data, DEFAULT_STATUS, self.datalen)
            }
            CommandLayout::Ee { cmd } => {
                codec.encode_ee(self.name, cmd, data, DEFAULT_STATUS, self.datalen)
            }
        }
    }
}

/// Wiegand-mode settings array and where configuration is written into it
#[derive(Debug, Clone, Copy)]
pub struct WiegandLayout {
    pub command: CommandSpec,
    pub template: &'static [u8],
    pub block_index: usize,
    pub buzzer_index: usize,
    /// OR'd into the buzzer byte when either access profile beeps
    pub buzzer_bits: u8,
    pub key_format_index: usize,
    /// Cleared when multiple-block mode is on
    pub multi_block_index: Option<usize>,
}

impl WiegandLayout {
    /// Settings array for `config`
    ///
    /// The block number is written as its raw value.
    pub fn settings(&self, config: &WiegandConfig) -> Vec<u8> {
        let mut settings = self.template.to_vec();

        settings[self.block_index] = config.card_block_number;

        if config.buzzer_enabled() {
            settings[self.buzzer_index] |= self.buzzer_bits;
        }

        if let Some(key_format) = config.key_format {
            settings[self.key_format_index] = key_format;
        }

        if config.multiple_block_mode {
            if let Some(index) = self.multi_block_index {
                settings[index] = 0x00;
            }
        }

        settings
    }
}

/// Mifare load-key payload layout
#[derive(Debug, Clone, Copy)]
pub struct KeyLoadLayout {
    pub command: CommandSpec,
    pub template: &'static [u8],
    pub key_type_index: usize,
    pub sector_index: usize,
    pub key_offset: usize,
}

impl KeyLoadLayout {
    pub fn payload(&self, config: &WiegandConfig) -> Vec<u8> {
        let mut payload = self.template.to_vec();
        let key = &config.key;

        payload[self.key_type_index] = key.key_type.code();
        payload[self.sector_index] = key.sector_for(config.card_block_number);
        payload[self.key_offset..self.key_offset + key.value.len()].copy_from_slice(&key.value);

        payload
    }
}

/// Fixed frame sent before anything else on connect
#[derive(Debug, Clone, Copy)]
pub struct PrimingFrame {
    pub command: CommandSpec,
    pub data: &'static [u8],
}

/// Relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DoorAction {
    Close = 0x00,
    Open = 0x01,
}

/// Reader LED state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LedColor {
    Off = 0x00,
    Red = 0x01,
    Green = 0x02,
}

/// Everything model-specific about the command set
#[derive(Debug)]
pub struct ModelTable {
    pub model: DeviceModel,
    pub priming: &'static [PrimingFrame],
    pub wiegand: WiegandLayout,
    pub load_key: Option<KeyLoadLayout>,
    pub door: CommandSpec,
    pub led: CommandSpec,
    pub buzzer: CommandSpec,
    pub firmware: CommandSpec,
    pub mac: CommandSpec,
    /// Layout of frames the reader sends back
    pub reply: FrameVariant,
}

impl ModelTable {
    pub fn for_model(model: DeviceModel) -> &'static ModelTable {
        match model {
            DeviceModel::Cn56 => &CN56,
            DeviceModel::Ct9 => &CT9,
        }
    }
}

const DOOR: CommandSpec = CommandSpec::extended("CT_CMD_Door", 0x0B, 0x01, Some(0x03));
const LED: CommandSpec = CommandSpec::extended("CT_CMD_Led", 0x0B, 0x02, Some(0x03));
const BUZZER: CommandSpec = CommandSpec::extended("CT_CMD_Buzzer", 0x0B, 0x03, Some(0x08));
const FIRMWARE: CommandSpec = CommandSpec::extended("GetVerNum", 0x0A, 0x01, Some(0x02));
const MAC: CommandSpec = CommandSpec::extended("GetMacAddr", 0x0A, 0x02, Some(0x02));

/// UDP family
pub static CN56: ModelTable = ModelTable {
    model: DeviceModel::Cn56,
    priming: &[],
    wiegand: WiegandLayout {
        command: CommandSpec::normal("CV_WiegandMode", 0x18, None),
        template: &[
            0x00, // wiegand 26
            0x00, // block number for AutoRead
            0x26, // REQUEST mode: 0x26 IDLE, 0x52 ALL
            0x11, // buzzer
            0x55,
            0xAA,
            0x03, // key format
            0x2E, // output select
            0xFF, // ISO15693 block, 0xFF outputs card inventory
            0x00, // card type Mifare 1
            0x00,
            0x00,
            0x00,
        ],
        block_index: 1,
        buzzer_index: 3,
        buzzer_bits: 0x02,
        key_format_index: 6,
        multi_block_index: None,
    },
    load_key: None,
    door: DOOR,
    led: LED,
    buzzer: BUZZER,
    firmware: FIRMWARE,
    mac: MAC,
    reply: FrameVariant::Reply,
};

/// TCP family
pub static CT9: ModelTable = ModelTable {
    model: DeviceModel::Ct9,
    priming: &[],
    wiegand: WiegandLayout {
        command: CommandSpec::normal("CMD_WiegandMode", 0x18, Some(0x10)),
        template: &[
            0x00, // wiegand 26
            0x00, // block number for AutoRead
            0x26, // REQUEST mode: 0x26 IDLE, 0x52 ALL
            0x12, // buzzer
            0x55,
            0xAA,
            0x03, // key format
            0x06, // output select
            0x01, // ISO15693 block
            0x00, // card type Mifare 1
            0x00,
            0x00,
            0x10,
            0x10,
            0x01, // single block read
        ],
        block_index: 1,
        buzzer_index: 3,
        buzzer_bits: 0x01,
        key_format_index: 6,
        multi_block_index: Some(14),
    },
    load_key: Some(KeyLoadLayout {
        command: CommandSpec::ee("ExCMD_MF_LoadKeyFromEE1", 0x0601, Some(0x0B)),
        template: &[
            0x60, // KEYA
            0x00, // sector
            0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
            0x10, // Mifare length
            0x00, // Mifare offset
        ],
        key_type_index: 0,
        sector_index: 1,
        key_offset: 2,
    }),
    door: DOOR,
    led: LED,
    buzzer: BUZZER,
    firmware: FIRMWARE,
    mac: MAC,
    reply: FrameVariant::Reply,
};

/// Buzzer payload `[mode, on1, off1, on2, off2, cycle]`
pub fn sound_pattern_payload(pattern: &SoundPattern) -> [u8; 6] {
    [
        pattern.mode,
        pattern.on1,
        pattern.off1,
        pattern.on2,
        pattern.off2,
        pattern.cycle,
    ]
}

/// Builds frames for one model
#[derive(Debug, Clone, Copy)]
pub struct CommandBuilder {
    table: &'static ModelTable,
}

impl CommandBuilder {
    pub fn new(table: &'static ModelTable) -> Self {
        Self { table }
    }

    pub fn for_model(model: DeviceModel) -> Self {
        Self::new(ModelTable::for_model(model))
    }

    pub fn table(&self) -> &'static ModelTable {
        self.table
    }

    pub fn model(&self) -> DeviceModel {
        self.table.model
    }

    pub fn reply_variant(&self) -> FrameVariant {
        self.table.reply
    }

    pub fn supports_key_load(&self) -> bool {
        self.table.load_key.is_some()
    }

    pub fn priming(&self, codec: &FrameCodec) -> Vec<Frame> {
        self.table
            .priming
            .iter()
            .map(|primer| primer.command.encode(codec, primer.data))
            .collect()
    }

    pub fn wiegand_mode(&self, codec: &FrameCodec, config: &WiegandConfig) -> Frame {
        let layout = &self.table.wiegand;
        layout.command.encode(codec, &layout.settings(config))
    }

    pub fn load_key(&self, codec: &FrameCodec, config: &WiegandConfig) -> Result<Frame> {
        let layout = self.table.load_key.as_ref().ok_or(Error::UnsupportedCommand {
            model: self.table.model,
            command: "load key",
        })?;

        Ok(layout.command.encode(codec, &layout.payload(config)))
    }

    pub fn door(&self, codec: &FrameCodec, action: DoorAction) -> Frame {
        self.table.door.encode(codec, &[action as u8])
    }

    pub fn led(&self, codec: &FrameCodec, color: LedColor) -> Frame {
        self.table.led.encode(codec, &[color as u8])
    }

    pub fn buzzer(&self, codec: &FrameCodec, pattern: &SoundPattern) -> Frame {
        self.table.buzzer.encode(codec, &sound_pattern_payload(pattern))
    }

    pub fn firmware_query(&self, codec: &FrameCodec) -> Frame {
        self.table.firmware.encode(codec, &[])
    }

    pub fn mac_query(&self, codec: &FrameCodec) -> Frame {
        self.table.mac.encode(codec, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameCommand;
    use civintec_types::AccessProfile;
    use pretty_assertions::assert_eq;

    fn beeping(block: u8) -> WiegandConfig {
        WiegandConfig {
            card_block_number: block,
            on_access_successful: AccessProfile {
                buzzer: true,
                led: true,
                ..AccessProfile::default()
            },
            ..WiegandConfig::default()
        }
    }

    #[test]
    fn test_template_lengths() {
        assert_eq!(CN56.wiegand.template.len(), 13);
        assert_eq!(CT9.wiegand.template.len(), 15);
        assert_eq!(CT9.load_key.unwrap().template.len(), 10);
    }

    #[test]
    fn test_cn56_wiegand_frame() {
        let codec = FrameCodec::new();
        let frame = CommandBuilder::for_model(DeviceModel::Cn56).wiegand_mode(&codec, &beeping(5));

        assert_eq!(frame.command, FrameCommand::Normal(0x18));
        assert_eq!(frame.data[1], 0x05);
        assert_eq!(frame.data[3], 0x13);
        assert_eq!(frame.to_hex(), "028000180e000005261355aa032eff000000008b03");
    }

    #[test]
    fn test_ct9_wiegand_buzzer_bits() {
        let codec = FrameCodec::new();
        let builder = CommandBuilder::for_model(DeviceModel::Ct9);

        let quiet = builder.wiegand_mode(&codec, &WiegandConfig::default());
        let loud = builder.wiegand_mode(&codec, &beeping(5));

        assert_eq!(quiet.data[3], 0x12);
        assert_eq!(loud.data[3], 0x13);
        assert_eq!(loud.data[1], 0x05);
        assert_eq!(loud.datalen, 0x10);
    }

    #[test]
    fn test_deny_buzzer_also_sets_bits() {
        let mut config = WiegandConfig::default();
        config.on_access_deny.buzzer = true;

        let settings = CN56.wiegand.settings(&config);
        assert_eq!(settings[3], 0x13);
    }

    #[test]
    fn test_block_number_written_raw() {
        let settings = CT9.wiegand.settings(&WiegandConfig {
            card_block_number: 12,
            ..WiegandConfig::default()
        });

        assert_eq!(settings[1], 0x0C);
        assert_eq!(
            hex::encode(&settings),
            "000c261255aa030601000000101001"
        );
    }

    #[test]
    fn test_multiple_block_and_key_format() {
        let config = WiegandConfig {
            key_format: Some(0x01),
            multiple_block_mode: true,
            ..WiegandConfig::default()
        };

        let ct9 = CT9.wiegand.settings(&config);
        assert_eq!(ct9[6], 0x01);
        assert_eq!(ct9[14], 0x00);

        let cn56 = CN56.wiegand.settings(&config);
        assert_eq!(cn56[6], 0x01);
        assert_eq!(cn56.len(), 13);
    }

    #[test]
    fn test_load_key_frame() {
        let codec = FrameCodec::new();
        let frame = CommandBuilder::for_model(DeviceModel::Ct9)
            .load_key(&codec, &beeping(5))
            .unwrap();

        assert_eq!(frame.command, FrameCommand::Ee(0x0601));
        assert_eq!(frame.to_hex(), "028000ee0601000b006001ffffffffffff10001303");
    }

    #[test]
    fn test_load_key_unsupported_on_udp_family() {
        let codec = FrameCodec::new();
        let result = CommandBuilder::for_model(DeviceModel::Cn56).load_key(&codec, &WiegandConfig::default());

        assert!(matches!(result, Err(Error::UnsupportedCommand { .. })));
        // Nothing was encoded, so the counter did not move
        assert_eq!(codec.current_sequence(), 0x80);
    }

    #[test]
    fn test_door_and_led_payloads() {
        let codec = FrameCodec::new();
        let builder = CommandBuilder::for_model(DeviceModel::Ct9);

        let open = builder.door(&codec, DoorAction::Open);
        let close = builder.door(&codec, DoorAction::Close);
        let green = builder.led(&codec, LedColor::Green);

        assert_eq!(open.command, FrameCommand::Extended { high: 0x0B, low: 0x01 });
        assert_eq!(open.data.as_ref(), &[0x01]);
        assert_eq!(close.data.as_ref(), &[0x00]);
        assert_eq!(green.data.as_ref(), &[0x02]);
        assert_eq!(green.seq, 0xA0);
    }

    #[test]
    fn test_buzzer_payload_from_pattern() {
        let codec = FrameCodec::new();
        let pattern = SoundPattern { mode: 0x04, on1: 5, off1: 2, on2: 5, off2: 2, cycle: 3 };

        let frame = CommandBuilder::for_model(DeviceModel::Cn56).buzzer(&codec, &pattern);

        assert_eq!(frame.data.as_ref(), &[0x04, 5, 2, 5, 2, 3]);
        assert_eq!(sound_pattern_payload(&SoundPattern::default())[0], 0x04);
    }

    #[test]
    fn test_queries_have_no_data() {
        let codec = FrameCodec::new();
        let builder = CommandBuilder::for_model(DeviceModel::Ct9);

        let firmware = builder.firmware_query(&codec);
        let mac = builder.mac_query(&codec);

        assert!(firmware.data.is_empty());
        assert!(mac.data.is_empty());
        assert_eq!(firmware.to_hex(), "028000ec0a000200016403");
        assert_eq!(mac.command, FrameCommand::Extended { high: 0x0A, low: 0x02 });
    }
}
