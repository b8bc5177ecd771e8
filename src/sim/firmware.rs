//! Simulated firmware command dispatch
//!
//! Turns one decoded request into the reply parameters the real firmware
//! would send. Missing request parameters read as empty.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::protocol::{Opcode, Request};

use super::network::Network;
use super::nvs::Nvs;

/// Everything behind the bus
#[derive(Debug, Default)]
pub struct Firmware {
    pub network: Network,
    pub nvs: Nvs,
    pub files: BTreeMap<String, Vec<u8>>,

    /// URL contents available to the download command
    pub downloads: BTreeMap<String, Vec<u8>>,
}

impl Firmware {
    /// Execute a request and produce the reply parameters
    pub fn handle(&mut self, request: &Request) -> Vec<Vec<u8>> {
        let op = request.opcode;
        let args = Args(request);
        tracing::trace!("Firmware executing {:?} with {} params", op, request.params.len());

        if (op as u8) >= 0x70 && op != Opcode::SocketErrno {
            self.network.begin_command();
        }

        match op {
            // -----------------------------------------------------------------
            // Preferences
            // -----------------------------------------------------------------
            Opcode::PrefBegin => {
                let partition = request.params.get(2).map(|_| args.text(2));
                let ok = self
                    .nvs
                    .begin(&args.text(0), args.u8(1) != 0, partition.as_deref());
                vec![vec![u8::from(ok)]]
            }
            Opcode::PrefEnd => {
                self.nvs.end();
                vec![vec![1]]
            }
            Opcode::PrefClear => vec![vec![u8::from(self.nvs.clear())]],
            Opcode::PrefRemove => vec![vec![u8::from(self.nvs.remove(&args.text(0)))]],
            Opcode::PrefLen => vec![le32(self.nvs.bytes_len(&args.text(0)))],
            Opcode::PrefStat => vec![le32(self.nvs.free_entries())],
            Opcode::PrefPut => {
                let written = self.nvs.put(&args.text(0), args.u8(1), args.bytes(2));
                vec![le32(written)]
            }
            Opcode::PrefGet => {
                let value = self.nvs.get(&args.text(0), args.u8(1)).unwrap_or(&[]);
                vec![value.to_vec()]
            }
            Opcode::PrefGetType => vec![vec![self.nvs.type_of(&args.text(0)) as u8]],

            // -----------------------------------------------------------------
            // Files
            // -----------------------------------------------------------------
            Opcode::FileWrite => {
                let offset = args.u32_le(0) as usize;
                let file = self.files.entry(args.text(2)).or_default();
                let data = args.bytes(3);
                if file.len() < offset + data.len() {
                    file.resize(offset + data.len(), 0);
                }
                file[offset..offset + data.len()].copy_from_slice(data);
                vec![vec![1]]
            }
            Opcode::FileRead => {
                let offset = args.u32_le(0) as usize;
                let len = args.u32_le(1) as usize;
                let data = match self.files.get(&args.text(2)) {
                    Some(file) if offset < file.len() => {
                        file[offset..file.len().min(offset + len)].to_vec()
                    }
                    _ => Vec::new(),
                };
                vec![data]
            }
            Opcode::FileDelete => {
                self.files.remove(&args.text(2));
                vec![vec![1]]
            }
            Opcode::FileExists => {
                let len = self
                    .files
                    .get(&args.text(2))
                    .map(|file| file.len() as i32)
                    .unwrap_or(-1);
                vec![len.to_le_bytes().to_vec()]
            }
            Opcode::FileDownload => {
                let ok = match self.downloads.get(&args.text(0)) {
                    Some(content) => {
                        self.files.insert(args.text(1), content.clone());
                        true
                    }
                    None => false,
                };
                vec![vec![u8::from(ok)]]
            }

            // -----------------------------------------------------------------
            // Sockets
            // -----------------------------------------------------------------
            Opcode::SocketCreate => vec![vec![self.network.create(args.u8(0), args.u8(1))]],
            Opcode::SocketClose => vec![vec![u8::from(self.network.close(args.u8(0)))]],
            Opcode::SocketErrno => vec![vec![self.network.errno()]],
            Opcode::SocketBind => {
                let ok = self.network.bind(args.u8(0), args.u16_be(1));
                vec![vec![u8::from(ok)]]
            }
            Opcode::SocketListen => {
                let ok = self.network.listen(args.u8(0), args.u8(1));
                vec![vec![u8::from(ok)]]
            }
            Opcode::SocketAccept => {
                let (handle, peer) = self.network.accept(args.u8(0));
                vec![
                    vec![handle],
                    peer.ip().octets().to_vec(),
                    peer.port().to_le_bytes().to_vec(),
                ]
            }
            Opcode::SocketConnect => {
                let ok = self
                    .network
                    .connect(args.u8(0), args.ip(1), args.u16_be(2));
                vec![vec![u8::from(ok)]]
            }
            Opcode::SocketSend => {
                let sent = self.network.send(args.u8(0), args.bytes(1));
                vec![(sent as u16).to_be_bytes().to_vec()]
            }
            Opcode::SocketRecv => {
                let size = args.u16_le(1) as usize;
                vec![self.network.recv(args.u8(0), size)]
            }
            Opcode::SocketSendTo => {
                let sent = self
                    .network
                    .send_to(args.u8(0), args.ip(1), args.u16_be(2), args.bytes(3));
                vec![(sent as u16).to_be_bytes().to_vec()]
            }
            Opcode::SocketRecvFrom => {
                let size = args.u16_le(1) as usize;
                match self.network.recv_from(args.u8(0), size) {
                    Some((from, data)) => vec![
                        from.ip().octets().to_vec(),
                        from.port().to_le_bytes().to_vec(),
                        data,
                    ],
                    None => vec![vec![0; 4], vec![0; 2], Vec::new()],
                }
            }
            Opcode::SocketIoctl => {
                vec![self.network.ioctl(args.u8(0), args.u32_le(1), args.bytes(2))]
            }
            Opcode::SocketPoll => vec![vec![self.network.poll(args.u8(0))]],
            Opcode::SocketSetOpt => {
                let ok = self
                    .network
                    .set_option(args.u8(0), args.u32_le(1), args.bytes(2));
                vec![vec![u8::from(ok)]]
            }
            Opcode::SocketGetOpt => {
                let capacity = args.u8(2) as usize;
                vec![self.network.get_option(args.u8(0), args.u32_le(1), capacity)]
            }
            Opcode::SocketPeerName => match self.network.peer_name(args.u8(0)) {
                Some(peer) => vec![
                    vec![1],
                    peer.ip().octets().to_vec(),
                    peer.port().to_le_bytes().to_vec(),
                ],
                None => vec![vec![0], vec![0; 4], vec![0; 2]],
            },
        }
    }
}

fn le32(value: usize) -> Vec<u8> {
    (value as u32).to_le_bytes().to_vec()
}

/// Positional request parameters
struct Args<'a>(&'a Request);

impl<'a> Args<'a> {
    fn bytes(&self, index: usize) -> &'a [u8] {
        self.0.params.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    fn text(&self, index: usize) -> String {
        String::from_utf8_lossy(self.bytes(index)).into_owned()
    }

    fn fixed<const N: usize>(&self, index: usize) -> [u8; N] {
        let mut raw = [0u8; N];
        let data = self.bytes(index);
        let len = data.len().min(N);
        raw[..len].copy_from_slice(&data[..len]);
        raw
    }

    fn u8(&self, index: usize) -> u8 {
        self.fixed::<1>(index)[0]
    }

    fn u16_be(&self, index: usize) -> u16 {
        u16::from_be_bytes(self.fixed(index))
    }

    fn u16_le(&self, index: usize) -> u16 {
        u16::from_le_bytes(self.fixed(index))
    }

    fn u32_le(&self, index: usize) -> u32 {
        u32::from_le_bytes(self.fixed(index))
    }

    fn ip(&self, index: usize) -> Ipv4Addr {
        Ipv4Addr::from(self.fixed::<4>(index))
    }
}
