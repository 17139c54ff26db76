use std::fs::File;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};

use zaas_core::identity::InstanceIdentity;
use zaas_core::manager::ManagerConfig;

use crate::error::BootstrapError;

const RULE: &str = "****************************";

/// Human-in-the-loop source of a manager-issued configuration.
pub trait PairingChannel {
    fn prompt_for_config(
        &mut self,
        identity: &InstanceIdentity,
    ) -> Result<ManagerConfig, BootstrapError>;
}

/// Pairing over the operator's terminal.
///
/// Prompts go to `out` and the acknowledgement is read from `ack` (normally
/// stdout/stdin). The pasted document is read from the controlling terminal
/// device until end-of-input, so a piped stdin cannot feed it.
pub struct TerminalPairing<R, W> {
    ack: R,
    out: W,
    tty_path: PathBuf,
}

impl TerminalPairing<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio(tty_path: &Path) -> Self {
        Self::new(io::stdin().lock(), io::stdout(), tty_path)
    }
}

impl<R: BufRead, W: Write> TerminalPairing<R, W> {
    pub fn new(ack: R, out: W, tty_path: &Path) -> Self {
        Self {
            ack,
            out,
            tty_path: tty_path.to_path_buf(),
        }
    }

    fn show_identity(&mut self, identity: &InstanceIdentity) -> io::Result<()> {
        writeln!(self.out, "{}", RULE)?;
        writeln!(self.out, "Please register the following UUID in ZaaS Manager:")?;
        writeln!(self.out, "{}", identity)?;
        writeln!(self.out, "{}", RULE)?;
        write!(self.out, "Press [Enter] when you are done. ")?;
        self.out.flush()
    }

    fn wait_for_enter(&mut self) -> Result<(), BootstrapError> {
        let mut line = String::new();
        let read = self
            .ack
            .read_line(&mut line)
            .map_err(|e| BootstrapError::io("failed to read operator confirmation", e))?;
        if read == 0 {
            return Err(BootstrapError::io(
                "failed to read operator confirmation",
                io::Error::new(io::ErrorKind::UnexpectedEof, "standard input closed"),
            ));
        }
        Ok(())
    }

    fn show_paste_instructions(&mut self) -> io::Result<()> {
        writeln!(self.out, "{}", RULE)?;
        writeln!(
            self.out,
            "Please provide the JSON configuration produced by ZaaS Manager:"
        )?;
        writeln!(self.out, "(paste it here, then press Ctrl-D)")?;
        writeln!(self.out, "{}", RULE)?;
        self.out.flush()
    }

    fn open_terminal(&self) -> Result<File, BootstrapError> {
        File::open(&self.tty_path).map_err(|source| BootstrapError::TerminalUnavailable {
            path: self.tty_path.clone(),
            source,
        })
    }

    fn read_document(&self, mut tty: File) -> Result<Vec<u8>, BootstrapError> {
        let mut data = Vec::new();
        tty.read_to_end(&mut data).map_err(|e| {
            BootstrapError::io(format!("failed to read from {}", self.tty_path.display()), e)
        })?;
        Ok(data)
    }
}

impl<R: BufRead, W: Write> PairingChannel for TerminalPairing<R, W> {
    fn prompt_for_config(
        &mut self,
        identity: &InstanceIdentity,
    ) -> Result<ManagerConfig, BootstrapError> {
        // Fail before asking anything of the operator if the paste cannot be read.
        let tty = self.open_terminal()?;

        self.show_identity(identity)
            .map_err(|e| BootstrapError::io("failed to write prompt", e))?;
        self.wait_for_enter()?;
        self.show_paste_instructions()
            .map_err(|e| BootstrapError::io("failed to write prompt", e))?;

        let document = self.read_document(tty)?;
        ManagerConfig::from_slice(&document).map_err(BootstrapError::InvalidPairingInput)
    }
}
