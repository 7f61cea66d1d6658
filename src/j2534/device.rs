use std::ffi::c_void;
use std::sync::Arc;

use crate::j2534::dll::J2534Lib;
use crate::j2534::types::*;

/// Represents an opened J2534 device (PassThruOpen handle)
pub struct J2534Device {
    lib: Arc<J2534Lib>,
    device_id: u32,
}

impl J2534Device {
    /// Open a J2534 device using the loaded DLL
    pub fn open(lib: Arc<J2534Lib>) -> Result<Self, String> {
        let mut device_id: u32 = 0;
        let ret = unsafe { (lib.pass_thru_open)(std::ptr::null(), &mut device_id) };
        check("PassThruOpen", ret)?;
        Ok(Self { lib, device_id })
    }

    /// Read device version strings
    pub fn read_version(&self) -> Result<DeviceVersion, String> {
        let mut firmware = [0u8; 80];
        let mut dll = [0u8; 80];
        let mut api = [0u8; 80];
        let ret = unsafe {
            (self.lib.pass_thru_read_version)(
                self.device_id,
                firmware.as_mut_ptr(),
                dll.as_mut_ptr(),
                api.as_mut_ptr(),
            )
        };
        check("PassThruReadVersion", ret)?;
        Ok(DeviceVersion {
            firmware: c_string(&firmware),
            dll: c_string(&dll),
            api: c_string(&api),
        })
    }

    /// Connect a raw CAN channel passing only ids that match one of the `(mask, pattern)` filters
    pub fn connect_can(
        &self,
        baudrate: u32,
        filters: &[(u32, u32)],
    ) -> Result<J2534Channel, String> {
        let mut channel_id: u32 = 0;
        let ret = unsafe {
            (self.lib.pass_thru_connect)(
                self.device_id,
                PROTOCOL_CAN,
                0, // flags
                baudrate,
                &mut channel_id,
            )
        };
        check("PassThruConnect CAN", ret)?;
        let channel = J2534Channel {
            lib: self.lib.clone(),
            channel_id,
        };
        for &(mask, pattern) in filters {
            let filter_id = channel.pass_filter(mask, pattern)?;
            log::debug!(
                "Pass filter {}: mask 0x{:03X}, pattern 0x{:03X}",
                filter_id,
                mask,
                pattern
            );
        }
        Ok(channel)
    }
}

impl Drop for J2534Device {
    fn drop(&mut self) {
        unsafe {
            (self.lib.pass_thru_close)(self.device_id);
        }
    }
}

fn c_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).to_string()
}

/// Version info from a J2534 device
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceVersion {
    pub firmware: String,
    pub dll: String,
    pub api: String,
}

/// Represents a connected J2534 channel
pub struct J2534Channel {
    lib: Arc<J2534Lib>,
    channel_id: u32,
}

impl J2534Channel {
    /// Raw CAN channels drop everything until a filter is installed
    fn pass_filter(&self, mask: u32, pattern: u32) -> Result<u32, String> {
        let mask = PassThruMsg::new_filter(mask);
        let pattern = PassThruMsg::new_filter(pattern);
        let mut filter_id: u32 = 0;
        let ret = unsafe {
            (self.lib.pass_thru_start_msg_filter)(
                self.channel_id,
                FILTER_PASS,
                &mask,
                &pattern,
                std::ptr::null(),
                &mut filter_id,
            )
        };
        check("PassThruStartMsgFilter", ret)?;
        Ok(filter_id)
    }

    /// Send a message on the channel
    pub fn send(&self, msg: &PassThruMsg, timeout_ms: u32) -> Result<(), String> {
        let mut num_msgs: u32 = 1;
        let ret = unsafe {
            (self.lib.pass_thru_write_msgs)(self.channel_id, msg, &mut num_msgs, timeout_ms)
        };
        check("PassThruWriteMsgs", ret)
    }

    /// Read up to `max` messages from the channel
    pub fn read(&self, max: usize, timeout_ms: u32) -> Result<Vec<PassThruMsg>, String> {
        let mut msgs = vec![PassThruMsg::default(); max];
        let mut num_msgs: u32 = msgs.len() as u32;
        let ret = unsafe {
            (self.lib.pass_thru_read_msgs)(
                self.channel_id,
                msgs.as_mut_ptr(),
                &mut num_msgs,
                timeout_ms,
            )
        };
        // An empty buffer just means nothing arrived yet
        if ret != 0 && !J2534Error::from_code(ret).is_empty_read() {
            check("PassThruReadMsgs", ret)?;
        }
        msgs.truncate(num_msgs as usize);
        Ok(msgs)
    }

    pub fn clear_rx_buffer(&self) -> Result<(), String> {
        self.ioctl("PassThruIoctl CLEAR_RX_BUFFER", CLEAR_RX_BUFFER)
    }

    pub fn clear_tx_buffer(&self) -> Result<(), String> {
        self.ioctl("PassThruIoctl CLEAR_TX_BUFFER", CLEAR_TX_BUFFER)
    }

    fn ioctl(&self, call: &str, id: u32) -> Result<(), String> {
        let ret = unsafe {
            (self.lib.pass_thru_ioctl)(
                self.channel_id,
                id,
                std::ptr::null::<c_void>(),
                std::ptr::null_mut(),
            )
        };
        check(call, ret)
    }
}

impl Drop for J2534Channel {
    fn drop(&mut self) {
        unsafe {
            (self.lib.pass_thru_disconnect)(self.channel_id);
        }
    }
}
