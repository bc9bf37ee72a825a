//! Named pipe backend.
//!
//! Server ends are duplex, byte-mode, single-instance pipes. Client ends
//! are opened inheritable because they become a child's standard handles.
//! A pipe object disappears from `\\.\pipe\` when its last handle closes,
//! so removal is a no-op.

use crate::naming::PipeName;
use pipespawn_common::PipeKind;
use std::fs::File;
use std::io;
use std::os::windows::io::{AsRawHandle, FromRawHandle, IntoRawHandle, OwnedHandle};
use std::time::Duration;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{
    CloseHandle, DuplicateHandle, DUPLICATE_SAME_ACCESS, ERROR_NO_DATA, ERROR_PIPE_CONNECTED,
    GENERIC_READ, GENERIC_WRITE, HANDLE, TRUE,
};
use windows::Win32::Security::SECURITY_ATTRIBUTES;
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_ATTRIBUTE_READONLY, FILE_FLAG_FIRST_PIPE_INSTANCE,
    FILE_SHARE_NONE, OPEN_EXISTING, PIPE_ACCESS_DUPLEX,
};
use windows::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, CreatePipe, WaitNamedPipeW, PIPE_READMODE_BYTE,
    PIPE_TYPE_BYTE, PIPE_WAIT,
};
use windows::Win32::System::Threading::GetCurrentProcess;

const PIPE_BUFFER_SIZE: u32 = 4096;

pub(crate) struct PendingServer(OwnedHandle);

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn owned(handle: HANDLE) -> OwnedHandle {
    // SAFETY: `handle` was just returned valid by the OS and is owned by no one else.
    unsafe { OwnedHandle::from_raw_handle(handle.0) }
}

pub(crate) fn create_server(name: &PipeName, _kind: PipeKind) -> io::Result<PendingServer> {
    let name = wide(name.as_str());
    let handle = unsafe {
        CreateNamedPipeW(
            PCWSTR(name.as_ptr()),
            PIPE_ACCESS_DUPLEX | FILE_FLAG_FIRST_PIPE_INSTANCE,
            PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
            1,
            PIPE_BUFFER_SIZE,
            PIPE_BUFFER_SIZE,
            0,
            None,
        )
    };
    if handle.is_invalid() {
        return Err(io::Error::last_os_error());
    }
    Ok(PendingServer(owned(handle)))
}

pub(crate) fn accept(server: PendingServer, _name: &PipeName, _kind: PipeKind) -> io::Result<File> {
    let raw = HANDLE(server.0.into_raw_handle());
    // SAFETY: `raw` is a valid pipe server handle we own.
    let connected = unsafe { ConnectNamedPipe(raw, None) };
    let handle = owned(raw);
    match connected {
        Ok(()) => Ok(File::from(handle)),
        // The client connected (and maybe already left) before we got here.
        Err(e) if e.code() == ERROR_PIPE_CONNECTED.to_hresult() => Ok(File::from(handle)),
        Err(e) if e.code() == ERROR_NO_DATA.to_hresult() => Ok(File::from(handle)),
        Err(e) => Err(io::Error::from(e)),
    }
}

pub(crate) fn connect_client(
    name: &PipeName,
    kind: PipeKind,
    timeout: Duration,
    _poll_interval: Duration,
) -> io::Result<OwnedHandle> {
    let name = wide(name.as_str());
    let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);

    if !unsafe { WaitNamedPipeW(PCWSTR(name.as_ptr()), timeout_ms) }.as_bool() {
        return Err(io::Error::last_os_error());
    }

    let (access, attributes) = if kind.is_child_input() {
        (GENERIC_READ, FILE_ATTRIBUTE_READONLY)
    } else {
        (GENERIC_WRITE, FILE_ATTRIBUTE_NORMAL)
    };
    let inherit = SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: std::ptr::null_mut(),
        bInheritHandle: TRUE,
    };

    let handle = unsafe {
        CreateFileW(
            PCWSTR(name.as_ptr()),
            access.0,
            FILE_SHARE_NONE,
            Some(&inherit as *const SECURITY_ATTRIBUTES),
            OPEN_EXISTING,
            attributes,
            HANDLE::default(),
        )
    }
    .map_err(io::Error::from)?;
    Ok(owned(handle))
}

/// Unlike `OwnedHandle::try_clone`, the duplicate stays inheritable.
pub(crate) fn duplicate(handle: &OwnedHandle) -> io::Result<OwnedHandle> {
    let mut duplicate = HANDLE::default();
    unsafe {
        let process = GetCurrentProcess();
        DuplicateHandle(
            process,
            HANDLE(handle.as_raw_handle()),
            process,
            &mut duplicate,
            0,
            TRUE,
            DUPLICATE_SAME_ACCESS,
        )
    }
    .map_err(io::Error::from)?;
    Ok(owned(duplicate))
}

pub(crate) fn remove(_name: &PipeName) -> io::Result<()> {
    Ok(())
}

pub(crate) fn close(file: File) -> io::Result<()> {
    let raw = HANDLE(file.into_raw_handle());
    // SAFETY: ownership of the handle was released by `into_raw_handle`.
    unsafe { CloseHandle(raw) }.map_err(io::Error::from)
}

pub(crate) fn anonymous_pipe() -> io::Result<(File, File)> {
    let mut read = HANDLE::default();
    let mut write = HANDLE::default();
    unsafe { CreatePipe(&mut read, &mut write, None, 0) }.map_err(io::Error::from)?;
    Ok((File::from(owned(read)), File::from(owned(write))))
}
