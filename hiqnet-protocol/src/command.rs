//! Command (message id) table.

use serde::Serialize;
use std::fmt;

/// Known command codes.
///
/// Headers carry the raw `u16`; this enum is a pure lookup over it, so
/// unknown codes still travel through the codec untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    DiscoInfo,
    GetNetworkInfo,
    RequestAddress,
    AddressUsed,
    SetAddress,
    Goodbye,
    Hello,
    MultiParamSet,
    MultiObjectParamSet,
    ParamSetPercent,
    MultiParamGet,
    GetAttributes,
    MultiParamSubscribe,
    MultiParamUnsubscribe,
    ParamSubscribeAll,
    UnsubscribeAll,
    GetVdList,
    Store,
    Recall,
    Locate,
}

impl Command {
    const TABLE: [(u16, Command, &'static str); 20] = [
        (0x0000, Command::DiscoInfo, "DiscoInfo"),
        (0x0002, Command::GetNetworkInfo, "GetNetworkInfo"),
        (0x0004, Command::RequestAddress, "RequestAddress"),
        (0x0005, Command::AddressUsed, "AddressUsed"),
        (0x0006, Command::SetAddress, "SetAddress"),
        (0x0007, Command::Goodbye, "Goodbye"),
        (0x0008, Command::Hello, "Hello"),
        (0x0100, Command::MultiParamSet, "MultiParamSet"),
        (0x0101, Command::MultiObjectParamSet, "MultiObjectParamSet"),
        (0x0102, Command::ParamSetPercent, "ParamSetPercent"),
        (0x0103, Command::MultiParamGet, "MultiParamGet"),
        (0x010D, Command::GetAttributes, "GetAttributes"),
        (0x010F, Command::MultiParamSubscribe, "MultiParamSubscribe"),
        (0x0112, Command::MultiParamUnsubscribe, "MultiParamUnsubscribe"),
        (0x0113, Command::ParamSubscribeAll, "ParamSubscribeAll"),
        (0x0114, Command::UnsubscribeAll, "UnsubscribeAll"),
        (0x011A, Command::GetVdList, "GetVDList"),
        (0x0124, Command::Store, "Store"),
        (0x0125, Command::Recall, "Recall"),
        (0x0129, Command::Locate, "Locate"),
    ];

    pub fn from_code(code: u16) -> Option<Self> {
        Self::TABLE
            .iter()
            .find(|(c, _, _)| *c == code)
            .map(|(_, cmd, _)| *cmd)
    }

    pub fn code(self) -> u16 {
        Self::TABLE
            .iter()
            .find(|(_, cmd, _)| *cmd == self)
            .map(|(c, _, _)| *c)
            .unwrap_or_default()
    }

    pub fn name(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(_, cmd, _)| *cmd == self)
            .map(|(_, _, n)| *n)
            .unwrap_or("Unknown")
    }

    /// Display name for any code.
    pub fn describe(code: u16) -> String {
        match Self::from_code(code) {
            Some(cmd) => cmd.name().to_string(),
            None => format!("{:#06x}", code),
        }
    }
}

impl From<Command> for u16 {
    fn from(cmd: Command) -> u16 {
        cmd.code()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
