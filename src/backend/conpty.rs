//! ConPTY backend for Windows
//!
//! Wraps the Windows Console Pseudo Terminal and a reader thread that
//! forwards output to the session as [`ProcessEvent`]s.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows::Win32::System::Console::{ClosePseudoConsole, CreatePseudoConsole, ResizePseudoConsole, COORD, HPCON};
use windows::Win32::System::Pipes::{CreatePipe, PeekNamedPipe};
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess, InitializeProcThreadAttributeList,
    TerminateProcess, UpdateProcThreadAttribute, WaitForSingleObject, CREATE_UNICODE_ENVIRONMENT,
    EXTENDED_STARTUPINFO_PRESENT, LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION, STARTUPINFOEXW,
};
use windows::Win32::System::IO::CancelIoEx;

use crate::core::dimensions::Dimensions;
use crate::core::launch::ResolvedLaunch;
use crate::core::process::{ProcessEvent, ProcessEventSink, PtyBackend, PtyError, ReadyInfo};

fn win_err(e: windows::core::Error) -> PtyError {
    PtyError::Io(io::Error::from_raw_os_error(e.code().0))
}

fn spawn_err(e: windows::core::Error) -> PtyError {
    PtyError::Spawn(e.to_string())
}

fn coord(dims: Dimensions) -> COORD {
    COORD {
        X: dims.cols.min(i16::MAX as u16) as i16,
        Y: dims.rows.min(i16::MAX as u16) as i16,
    }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Quote one argument for CreateProcessW's command line
fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }
    format!("\"{}\"", arg.replace('"', "\\\""))
}

fn command_line(launch: &ResolvedLaunch) -> String {
    std::iter::once(launch.executable.as_str())
        .chain(launch.args.iter().map(String::as_str))
        .map(quote_arg)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Current environment overlaid with the launch's, as a UTF-16 block
fn environment_block(extra: &BTreeMap<String, String>) -> Vec<u16> {
    let mut vars: BTreeMap<String, String> = std::env::vars().collect();
    vars.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    let mut block: Vec<u16> = vars
        .iter()
        .flat_map(|(k, v)| format!("{}={}", k, v).encode_utf16().chain(std::iter::once(0)).collect::<Vec<_>>())
        .collect();
    block.push(0);
    block
}

/// ConPTY handle wrapper
struct ConPty {
    hpc: HPCON,
    input_write: HANDLE,
    output_read: HANDLE,
    process: PROCESS_INFORMATION,
}

// Safety: ConPty handles are thread-safe when accessed properly
unsafe impl Send for ConPty {}
unsafe impl Sync for ConPty {}

impl ConPty {
    unsafe fn spawn(launch: &ResolvedLaunch, dims: Dimensions) -> Result<Self, PtyError> {
        // Create pipes for PTY communication
        let mut pty_input_read = HANDLE::default();
        let mut pty_input_write = HANDLE::default();
        let mut pty_output_read = HANDLE::default();
        let mut pty_output_write = HANDLE::default();

        // Input pipe (we write, PTY reads)
        CreatePipe(&mut pty_input_read, &mut pty_input_write, None, 0).map_err(spawn_err)?;

        // Output pipe (PTY writes, we read)
        CreatePipe(&mut pty_output_read, &mut pty_output_write, None, 0).map_err(spawn_err)?;

        let hpc = CreatePseudoConsole(coord(dims), pty_input_read, pty_output_write, 0).map_err(spawn_err)?;

        // Close the handles that the ConPTY now owns
        let _ = CloseHandle(pty_input_read);
        let _ = CloseHandle(pty_output_write);

        let mut attr_list_size: usize = 0;
        let _ = InitializeProcThreadAttributeList(LPPROC_THREAD_ATTRIBUTE_LIST::default(), 1, 0, &mut attr_list_size);

        let mut attr_list_buffer = vec![0u8; attr_list_size];
        let attr_list = LPPROC_THREAD_ATTRIBUTE_LIST(attr_list_buffer.as_mut_ptr() as *mut _);

        InitializeProcThreadAttributeList(attr_list, 1, 0, &mut attr_list_size).map_err(spawn_err)?;

        // Associate ConPTY with the process
        const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x00020016;
        UpdateProcThreadAttribute(
            attr_list,
            0,
            PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
            Some(hpc.0 as *const _),
            std::mem::size_of::<HPCON>(),
            None,
            None,
        )
        .map_err(spawn_err)?;

        let mut startup_info = STARTUPINFOEXW {
            StartupInfo: std::mem::zeroed(),
            lpAttributeList: attr_list,
        };
        startup_info.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;

        let mut process_info = PROCESS_INFORMATION::default();
        let mut cmd_wide = wide(&command_line(launch));
        let env_block = environment_block(&launch.env);
        let cwd_wide = launch.cwd.as_ref().map(|p| wide(&p.to_string_lossy()));
        let cwd_ptr = match &cwd_wide {
            Some(cwd) => PCWSTR(cwd.as_ptr()),
            None => PCWSTR::null(),
        };

        let created = CreateProcessW(
            PCWSTR::null(),
            PWSTR(cmd_wide.as_mut_ptr()),
            None,
            None,
            false,
            EXTENDED_STARTUPINFO_PRESENT | CREATE_UNICODE_ENVIRONMENT,
            Some(env_block.as_ptr() as *const _),
            cwd_ptr,
            &startup_info.StartupInfo,
            &mut process_info,
        );
        DeleteProcThreadAttributeList(attr_list);
        if let Err(e) = created {
            ClosePseudoConsole(hpc);
            let _ = CloseHandle(pty_input_write);
            let _ = CloseHandle(pty_output_read);
            return Err(spawn_err(e));
        }

        Ok(ConPty {
            hpc,
            input_write: pty_input_write,
            output_read: pty_output_read,
            process: process_info,
        })
    }

    fn pid(&self) -> u32 {
        self.process.dwProcessId
    }

    fn resize(&self, dims: Dimensions) -> Result<(), PtyError> {
        unsafe { ResizePseudoConsole(self.hpc, coord(dims)).map_err(win_err) }
    }

    /// Write bytes to the PTY (input to shell)
    fn write(&self, data: &[u8]) -> Result<usize, PtyError> {
        let mut written: u32 = 0;
        unsafe {
            WriteFile(self.input_write, Some(data), Some(&mut written), None).map_err(win_err)?;
        }
        Ok(written as usize)
    }

    /// Read bytes from the PTY (output from shell) - non-blocking
    fn read(&self, buffer: &mut [u8]) -> Result<usize, PtyError> {
        let mut available: u32 = 0;
        unsafe {
            if PeekNamedPipe(self.output_read, None, 0, None, Some(&mut available), None).is_err() {
                // Pipe error - likely process exited
                return Err(PtyError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "Pipe closed")));
            }
        }
        if available == 0 {
            return Ok(0);
        }

        let to_read = (available as usize).min(buffer.len());
        let mut read: u32 = 0;
        unsafe {
            ReadFile(self.output_read, Some(&mut buffer[..to_read]), Some(&mut read), None).map_err(win_err)?;
        }
        Ok(read as usize)
    }

    fn is_running(&self) -> bool {
        unsafe {
            let result = WaitForSingleObject(self.process.hProcess, 0);
            result.0 != 0 // WAIT_OBJECT_0 = 0 means signaled (exited)
        }
    }

    fn exit_code(&self) -> Option<i32> {
        if self.is_running() {
            return None;
        }
        let mut exit_code: u32 = 0;
        unsafe {
            GetExitCodeProcess(self.process.hProcess, &mut exit_code)
                .ok()
                .map(|_| exit_code as i32)
        }
    }

    fn terminate(&self) {
        unsafe {
            let _ = TerminateProcess(self.process.hProcess, 1);
        }
    }

    /// Cancel pending read operations (to unblock reader thread)
    fn cancel_read(&self) {
        unsafe {
            let _ = CancelIoEx(self.output_read, None);
        }
    }
}

impl Drop for ConPty {
    fn drop(&mut self) {
        unsafe {
            // Close the pseudo console first
            ClosePseudoConsole(self.hpc);

            let _ = CloseHandle(self.input_write);
            let _ = CloseHandle(self.output_read);
            let _ = CloseHandle(self.process.hProcess);
            let _ = CloseHandle(self.process.hThread);
        }
    }
}

/// [`PtyBackend`] over ConPTY
#[derive(Default)]
pub struct ConPtyBackend {
    pty: Option<Arc<ConPty>>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
    cwd: Option<PathBuf>,
}

impl ConPtyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn pty(&self) -> Result<&ConPty, PtyError> {
        self.pty.as_deref().ok_or(PtyError::NotRunning)
    }

    fn stop_reader(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(pty) = &self.pty {
            pty.cancel_read();
        }
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }
}

impl PtyBackend for ConPtyBackend {
    fn spawn(&mut self, launch: &ResolvedLaunch, dims: Dimensions, events: ProcessEventSink) -> Result<(), PtyError> {
        self.stop_reader();
        let pty = Arc::new(unsafe { ConPty::spawn(launch, dims)? });
        info!("ConPTY spawned {} (pid {})", launch.executable, pty.pid());

        self.pty = Some(pty.clone());
        self.cwd = launch.cwd.clone();
        self.running = Arc::new(AtomicBool::new(true));
        self.paused = Arc::new(AtomicBool::new(false));

        events.send(ProcessEvent::Ready(ReadyInfo {
            pid: pty.pid(),
            cwd: launch.cwd.clone(),
        }));

        let running = self.running.clone();
        let paused = self.paused.clone();
        let reader_thread = thread::Builder::new()
            .name("conpty-reader".to_string())
            .spawn(move || {
                let mut buffer = vec![0u8; 4096];
                loop {
                    if !running.load(Ordering::SeqCst) {
                        return;
                    }
                    if paused.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(5));
                        continue;
                    }
                    match pty.read(&mut buffer) {
                        Ok(0) => {
                            if !pty.is_running() {
                                break;
                            }
                            // No data available (non-blocking), sleep and retry
                            thread::sleep(Duration::from_millis(5));
                        }
                        Ok(n) => {
                            if !events.send(ProcessEvent::Data(buffer[..n].to_vec())) {
                                running.store(false, Ordering::SeqCst);
                                return;
                            }
                        }
                        Err(e) => {
                            debug!("ConPTY read ended: {}", e);
                            break;
                        }
                    }
                }
                running.store(false, Ordering::SeqCst);
                events.send(ProcessEvent::Exit(pty.exit_code()));
            })?;

        self.reader_thread = Some(reader_thread);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        let pty = self.pty()?;
        let mut offset = 0;
        while offset < data.len() {
            offset += pty.write(&data[offset..])?;
        }
        Ok(())
    }

    fn resize(&mut self, dims: Dimensions) -> Result<(), PtyError> {
        self.pty()?.resize(dims)
    }

    fn signal(&mut self, signal: &str) -> Result<(), PtyError> {
        match signal {
            "SIGINT" => self.write(b"\x03"),
            "SIGKILL" | "SIGTERM" => {
                self.pty()?.terminate();
                Ok(())
            }
            _ => Err(PtyError::Unsupported("signal")),
        }
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn shutdown(&mut self, immediate: bool) {
        let Some(pty) = self.pty.clone() else {
            return;
        };
        if immediate {
            pty.terminate();
        } else if pty.is_running() {
            // Closing the console ends the client process
            warn!("ConPTY shutting down with process {} still running", pty.pid());
            pty.terminate();
        }
        self.stop_reader();
        self.pty = None;
    }

    fn cwd(&self) -> Option<PathBuf> {
        self.cwd.clone()
    }
}

impl Drop for ConPtyBackend {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_quoting() {
        assert_eq!(quote_arg("pwsh.exe"), "pwsh.exe");
        assert_eq!(quote_arg("C:\\Program Files\\x.exe"), "\"C:\\Program Files\\x.exe\"");
        assert_eq!(quote_arg(""), "\"\"");
    }

    #[test]
    fn test_environment_block_is_double_terminated() {
        let mut extra = BTreeMap::new();
        extra.insert("TERM_PROGRAM".to_string(), "termctl".to_string());
        let block = environment_block(&extra);
        assert_eq!(&block[block.len() - 2..], &[0, 0]);
        let text = String::from_utf16_lossy(&block);
        assert!(text.contains("TERM_PROGRAM=termctl"));
    }
}
