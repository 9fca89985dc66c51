//! Translates rtl_tcp command frames into radio calls

use rtltcp_broadcaster::SessionId;
use rtltcp_proto::{Command, CommandType};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::radio::RadioControl;

/// Command handler installed on the server
///
/// Never closes a session: failures are logged and the client may retry.
pub struct CommandDispatcher<R: RadioControl> {
    radio: Arc<R>,
    gain_table: Vec<f32>,
}

impl<R: RadioControl> CommandDispatcher<R> {
    /// `gain_steps` entries spaced `gain_step_db` apart, starting at 0 dB
    pub fn new(radio: Arc<R>, gain_steps: u32, gain_step_db: f32) -> Self {
        let gain_table = (0..gain_steps).map(|i| i as f32 * gain_step_db).collect();
        Self { radio, gain_table }
    }

    pub fn gain_table(&self) -> &[f32] {
        &self.gain_table
    }

    /// Apply one command. Returns whether the session stays open.
    pub fn handle(&self, session: SessionId, command: Command) -> bool {
        let param = command.param;

        let result = match command.command_type {
            CommandType::SetFrequency => {
                info!("Setting frequency to {} Hz", param);
                self.radio.set_center_frequency(param)
            }
            CommandType::SetSampleRate => {
                info!("Setting sample rate to {} S/s", param);
                self.radio.set_sample_rate(param)
            }
            CommandType::SetGain => {
                // rtl_tcp sends tenths of a dB
                let db = param as f32 / 10.0;
                info!("Setting gain to {:.1} dB", db);
                self.radio.set_gain_db(db)
            }
            CommandType::SetTunerGainByIndex => match self.gain_table.get(param as usize) {
                Some(&db) => {
                    info!("Setting gain to {:.1} dB (index {})", db, param);
                    self.radio.set_gain_db(db)
                }
                None => {
                    error!(
                        "Received gain index {} but that's invalid. Maximum is {}",
                        param,
                        self.gain_table.len().saturating_sub(1)
                    );
                    Ok(())
                }
            },
            CommandType::SetGainMode => self.radio.set_manual_gain(param != 0),
            CommandType::SetAgcMode => self.radio.set_agc(param != 0),
            other => {
                debug!(%session, "Command {} not handled", other);
                Ok(())
            }
        };

        if let Err(e) = result {
            error!(%session, "Failed to apply {}: {}", command, e);
        }

        true
    }
}
