use std::ffi::c_void;
use std::path::{Path, PathBuf};

use crate::j2534::types::*;

/// Type aliases for J2534 DLL function pointers
type PassThruOpenFn = unsafe extern "system" fn(*const c_void, *mut u32) -> u32;
type PassThruCloseFn = unsafe extern "system" fn(u32) -> u32;
type PassThruConnectFn = unsafe extern "system" fn(u32, u32, u32, u32, *mut u32) -> u32;
type PassThruDisconnectFn = unsafe extern "system" fn(u32) -> u32;
type PassThruReadMsgsFn = unsafe extern "system" fn(u32, *mut PassThruMsg, *mut u32, u32) -> u32;
type PassThruWriteMsgsFn = unsafe extern "system" fn(u32, *const PassThruMsg, *mut u32, u32) -> u32;
type PassThruStartMsgFilterFn =
    unsafe extern "system" fn(u32, u32, *const PassThruMsg, *const PassThruMsg, *const PassThruMsg, *mut u32) -> u32;
type PassThruIoctlFn = unsafe extern "system" fn(u32, u32, *const c_void, *mut c_void) -> u32;
type PassThruReadVersionFn = unsafe extern "system" fn(u32, *mut u8, *mut u8, *mut u8) -> u32;

/// Holds a dynamically loaded J2534 DLL and the entry points raw CAN access needs
pub struct J2534Lib {
    _lib: libloading::Library,
    pub pass_thru_open: PassThruOpenFn,
    pub pass_thru_close: PassThruCloseFn,
    pub pass_thru_connect: PassThruConnectFn,
    pub pass_thru_disconnect: PassThruDisconnectFn,
    pub pass_thru_read_msgs: PassThruReadMsgsFn,
    pub pass_thru_write_msgs: PassThruWriteMsgsFn,
    pub pass_thru_start_msg_filter: PassThruStartMsgFilterFn,
    pub pass_thru_ioctl: PassThruIoctlFn,
    pub pass_thru_read_version: PassThruReadVersionFn,
}

/// Look up one exported entry point; `name` is NUL terminated
unsafe fn entry<T: Copy>(lib: &libloading::Library, name: &[u8]) -> Result<T, String> {
    match lib.get::<T>(name) {
        Ok(symbol) => Ok(*symbol),
        Err(e) => Err(format!(
            "{} not found: {}",
            String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name)),
            e
        )),
    }
}

impl J2534Lib {
    pub fn load(dll_path: &Path) -> Result<Self, String> {
        // SAFETY: the PassThru DLL runs its initialisation on load and the entry point
        // signatures are fixed by SAE J2534-1 v04.04
        unsafe {
            let lib = libloading::Library::new(dll_path).map_err(|e| {
                format!("Failed to load J2534 DLL '{}': {}", dll_path.display(), e)
            })?;
            let loaded = Self {
                pass_thru_open: entry(&lib, b"PassThruOpen\0")?,
                pass_thru_close: entry(&lib, b"PassThruClose\0")?,
                pass_thru_connect: entry(&lib, b"PassThruConnect\0")?,
                pass_thru_disconnect: entry(&lib, b"PassThruDisconnect\0")?,
                pass_thru_read_msgs: entry(&lib, b"PassThruReadMsgs\0")?,
                pass_thru_write_msgs: entry(&lib, b"PassThruWriteMsgs\0")?,
                pass_thru_start_msg_filter: entry(&lib, b"PassThruStartMsgFilter\0")?,
                pass_thru_ioctl: entry(&lib, b"PassThruIoctl\0")?,
                pass_thru_read_version: entry(&lib, b"PassThruReadVersion\0")?,
                _lib: lib,
            };
            log::debug!("Loaded J2534 library {}", dll_path.display());
            Ok(loaded)
        }
    }
}

/// Registry key every J2534 v04.04 driver registers its devices under
#[cfg(target_os = "windows")]
const PASSTHRU_KEY: &str = r"SOFTWARE\PassThruSupport.04.04";

/// `(device name, DLL path)` for every registered PassThru device that supports raw CAN.
/// Both registry views are searched because 32-bit drivers register under WOW6432Node.
#[cfg(target_os = "windows")]
pub fn discover_j2534_dlls() -> Vec<(String, PathBuf)> {
    use winreg::enums::*;
    use winreg::RegKey;

    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
    let mut seen = std::collections::HashSet::new();
    let mut results = Vec::new();

    for view in [KEY_WOW64_64KEY, KEY_WOW64_32KEY] {
        let Ok(vendors) = hklm.open_subkey_with_flags(PASSTHRU_KEY, KEY_READ | view) else {
            continue;
        };
        let devices = vendors.enum_keys().filter_map(Result::ok).filter_map(|name| {
            let key = vendors.open_subkey_with_flags(&name, KEY_READ).ok()?;
            Some((name, key))
        });
        for (key_name, key) in devices {
            // Devices without raw CAN cannot carry TP2.0
            if key.get_value::<u32, _>("CAN").map_or(false, |can| can == 0) {
                continue;
            }
            let Ok(library) = key.get_value::<String, _>("FunctionLibrary") else {
                continue;
            };
            if seen.insert(library.to_lowercase()) {
                let name = key.get_value::<String, _>("Name").unwrap_or(key_name);
                results.push((name, PathBuf::from(library)));
            }
        }
    }
    results
}

#[cfg(not(target_os = "windows"))]
pub fn discover_j2534_dlls() -> Vec<(String, PathBuf)> {
    Vec::new()
}
