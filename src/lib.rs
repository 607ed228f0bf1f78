use std::ffi::{OsStr, OsString};
use std::fs;
use std::net::SocketAddr;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use log::{debug, info};

mod err;
pub use err::*;

pub mod proto;

use proto::{gbn, sr, stop_wait, Connection, Endpoint, Method, TestCase, MAX_PAYLOAD};

/// Largest file the 16-bit sequence space can carry.
pub const MAX_FILE_SIZE: usize = (u16::MAX as usize - 1) * MAX_PAYLOAD;

/// Binds the server socket and hands off to [`serve`]. One transfer per
/// process: accept, receive, tear down, return.
pub fn run_server(
    addr: SocketAddr,
    method: Method,
    test: Option<TestCase>,
    dir: &Path,
) -> Result<PathBuf, Error> {
    let ep = Endpoint::bind(addr)?;

    serve(&ep, method, test, dir)
}

/// Accepts a single connection on an already bound endpoint, receives one
/// file into `dir` and completes the teardown.
pub fn serve(
    ep: &Endpoint,
    method: Method,
    test: Option<TestCase>,
    dir: &Path,
) -> Result<PathBuf, Error> {
    info!("listening on {} ({:?})", ep.local_addr()?, method);

    let mut conn = Connection::new();
    let peer = conn.accept(ep)?;

    let file_name = recv_file_name(ep)?;
    let out_path = dir.join(output_file_name(&file_name));
    info!("receiving {:?} from {peer} into {:?}", file_name, out_path);

    let received = match method {
        Method::StopAndWait => stop_wait::recv(ep, test)?,
        Method::Gbn => gbn::recv(ep, test)?,
        Method::Sr => sr::recv(ep, test)?,
    };

    fs::write(&out_path, &received)?;
    info!("wrote {} bytes to {:?}", received.len(), out_path);

    conn.wait_close(ep)?;

    Ok(out_path)
}

/// Connects to the server, announces the file name, pushes the file
/// through the chosen engine, prints the throughput report and tears the
/// connection down.
pub fn run_client(
    server: SocketAddr,
    file: &Path,
    method: Method,
    test: Option<TestCase>,
) -> Result<(), Error> {
    let bind_addr: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let ep = Endpoint::bind(bind_addr)?;

    let mut conn = Connection::new();
    conn.connect(&ep, server)?;

    let name = file
        .file_name()
        .ok_or_else(|| Error::FileName(file.to_path_buf()))?;
    ep.send(name.as_bytes(), server)?;
    info!("announced file name {:?}", name);

    let data = fs::read(file)?;
    if data.len() > MAX_FILE_SIZE {
        return Err(Error::FileTooLarge);
    }
    debug!("loaded {} bytes from {:?}", data.len(), file);

    let stats = match method {
        Method::StopAndWait => stop_wait::send(&ep, server, &data, test)?,
        Method::Gbn => gbn::send(&ep, server, &data, test)?,
        Method::Sr => sr::send(&ep, server, &data, test)?,
    };

    println!("----------------------------------------------------------");
    println!("{stats}");
    println!("----------------------------------------------------------");

    conn.close(&ep)?;

    Ok(())
}

/// The name announcement is a bare datagram with no protocol header, so
/// anything that arrives before the engines start is the file name.
fn recv_file_name(ep: &Endpoint) -> Result<OsString, Error> {
    loop {
        if let Some((buf, _)) = ep.recv()? {
            return Ok(OsString::from_vec(buf));
        }
    }
}

/// `report.csv` becomes `report_rcv.csv`; a name without a dot gets the
/// marker appended. Operates on raw bytes so any 8-bit name survives.
pub fn output_file_name(name: &OsStr) -> OsString {
    let bytes = name.as_bytes();

    let mut out = Vec::with_capacity(bytes.len() + 4);
    match bytes.iter().rposition(|&b| b == b'.') {
        Some(dot) => {
            out.extend_from_slice(&bytes[..dot]);
            out.extend_from_slice(b"_rcv");
            out.extend_from_slice(&bytes[dot..]);
        }
        None => {
            out.extend_from_slice(bytes);
            out.extend_from_slice(b"_rcv");
        }
    }

    OsString::from_vec(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_marks_before_the_final_dot() {
        assert_eq!(output_file_name(OsStr::new("file.txt")), "file_rcv.txt");
        assert_eq!(
            output_file_name(OsStr::new("archive.tar.gz")),
            "archive.tar_rcv.gz"
        );
        assert_eq!(output_file_name(OsStr::new("README")), "README_rcv");
        assert_eq!(output_file_name(OsStr::new(".bashrc")), "_rcv.bashrc");
    }

    #[test]
    fn output_name_keeps_non_utf8_bytes() {
        let name = OsString::from_vec(vec![0xff, 0xfe, b'.', b'b', b'i', b'n']);
        let expected = OsString::from_vec(vec![0xff, 0xfe, b'_', b'r', b'c', b'v', b'.', b'b', b'i', b'n']);

        assert_eq!(output_file_name(&name), expected);
    }
}
