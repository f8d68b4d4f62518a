//! Synthetic taps through the XTEST extension

use anyhow::{Context, Result};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{BUTTON_PRESS_EVENT, BUTTON_RELEASE_EVENT, MOTION_NOTIFY_EVENT, Window};
use x11rb::protocol::xtest::ConnectionExt as XTestExt;
use x11rb::rust_connection::RustConnection;

use super::{DispatchError, TapDispatcher};
use crate::constants::x11;
use crate::coordinates::Point;

pub struct X11TapDispatcher {
    conn: RustConnection,
    root: Window,
}

impl X11TapDispatcher {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).context("Failed to connect to X11 server")?;
        let root = conn.setup().roots[screen_num].root;

        let version = conn
            .xtest_get_version(2, 2)
            .context("Failed to query XTEST extension")?
            .reply()
            .context("XTEST extension is not available on this display")?;
        info!(
            major = version.major_version,
            minor = version.minor_version,
            "XTEST tap dispatcher ready"
        );

        Ok(Self { conn, root })
    }

    fn fake(&self, event: u8, detail: u8, x: i16, y: i16) -> Result<()> {
        self.conn
            .xtest_fake_input(event, detail, x11rb::CURRENT_TIME, self.root, x, y, x11::CORE_DEVICE)
            .context("Failed to send XTEST fake input")?
            .check()
            .context("XTEST fake input was rejected")?;
        Ok(())
    }

    fn press_and_release(&self, x: i16, y: i16, duration: Duration) -> Result<()> {
        self.fake(MOTION_NOTIFY_EVENT, 0, x, y)?;
        self.fake(BUTTON_PRESS_EVENT, x11::BUTTON_LEFT, x, y)?;
        self.conn.flush().context("Failed to flush X11 connection after press")?;
        thread::sleep(duration);
        self.fake(BUTTON_RELEASE_EVENT, x11::BUTTON_LEFT, x, y)?;
        self.conn.flush().context("Failed to flush X11 connection after release")?;
        Ok(())
    }
}

impl TapDispatcher for X11TapDispatcher {
    fn tap(&self, point: Point, duration: Duration) -> Result<(), DispatchError> {
        // `as` saturates, so off-screen values pin to the i16 range
        let x = point.x.round() as i16;
        let y = point.y.round() as i16;
        debug!(x = x, y = y, duration_ms = duration.as_millis() as u64, "XTEST tap");
        self.press_and_release(x, y, duration)
            .map_err(|e| DispatchError::Failed(format!("{:#}", e)))
    }
}
