//! Virtual link layer: one UDP socket, point-to-point links to each peer.
//!
//! This stands in for link hardware. A link can be taken down at runtime to
//! exercise route aging; the interface configuration itself never changes.

use core::fmt;
use std::net::Ipv4Addr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::{
    net::UdpSocket,
    sync::{
        broadcast::{self, Receiver, Sender},
        Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use crate::args::Args;
use crate::utils::net::localhost_with_port;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Binding the router's socket failed. The only fatal startup error.
    Bind(std::io::Error),
    LinkNotFound,
    LinkInactive,
    Io(std::io::Error),
}

pub struct LinkIter<'a> {
    inner: RwLockReadGuard<'a, Vec<Link>>,
}

impl<'a> Deref for LinkIter<'a> {
    type Target = Vec<Link>;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

pub struct LinkRef<'a> {
    guard: RwLockReadGuard<'a, Vec<Link>>,
    idx: usize,
}

impl<'a> Deref for LinkRef<'a> {
    type Target = Link;
    fn deref(&self) -> &Self::Target {
        &self.guard[self.idx]
    }
}

pub struct LinkMutRef<'a> {
    guard: RwLockWriteGuard<'a, Vec<Link>>,
    idx: usize,
}

impl<'a> Deref for LinkMutRef<'a> {
    type Target = Link;
    fn deref(&self) -> &Self::Target {
        &self.guard[self.idx]
    }
}

impl<'a> DerefMut for LinkMutRef<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard[self.idx]
    }
}

pub struct LinkLayer {
    links: Links,
    listener_sub: Mutex<Option<Sender<Vec<u8>>>>,
}

impl LinkLayer {
    pub async fn new(args: &Args) -> Result<Self> {
        let udp_socket = Arc::new(
            UdpSocket::bind(localhost_with_port(args.host_port))
                .await
                .map_err(Error::Bind)?,
        );

        let links = Links::new(
            args.links
                .iter()
                .map(|l| Link {
                    dest_port: l.dest_port,
                    peer: l.dest_ip,
                    interface_ip: l.interface_ip,
                    activated: true,
                    sock: udp_socket.clone(),
                })
                .collect(),
        );

        Ok(Self {
            links,
            listener_sub: Mutex::new(None),
        })
    }

    /// Transmit a frame out of one interface.
    pub async fn send_on(&self, if_index: u16, payload: &[u8]) -> Result<()> {
        self.links
            .get(if_index)
            .await
            .ok_or(Error::LinkNotFound)?
            .send(payload)
            .await
    }

    pub async fn activate_link(&self, if_index: u16) -> Result<()> {
        self.links
            .get_mut(if_index)
            .await
            .ok_or(Error::LinkNotFound)?
            .activate();
        Ok(())
    }

    pub async fn deactivate_link(&self, if_index: u16) -> Result<()> {
        self.links
            .get_mut(if_index)
            .await
            .ok_or(Error::LinkNotFound)?
            .deactivate();
        Ok(())
    }

    pub async fn iter_links(&self) -> LinkIter<'_> {
        self.links.iter().await
    }

    pub async fn find_link_to(&self, peer: Ipv4Addr) -> Option<LinkRef<'_>> {
        self.links.find(|link| link.peer() == peer).await
    }

    /// Subscribe to the stream of frames received by this router.
    pub async fn listen(&self) -> Receiver<Vec<u8>> {
        let mut sub = self.listener_sub.lock().await;
        if let Some(ref sub_handle) = *sub {
            return sub_handle.subscribe();
        }

        let sock = self
            .links
            .get(0)
            .await
            .expect("cannot listen on an uninitialized network")
            .clone_socket();

        let (tx, rx) = broadcast::channel(100);
        let sender = tx.clone();

        tokio::spawn(async move {
            let mut buf = [0; 65536];
            while let Ok(sz) = sock.recv(&mut buf).await {
                if sender.send(buf[..sz].into()).is_err() {
                    log::error!("Failed to send packet to receiver");
                }
            }
        });

        *sub = Some(tx);
        rx
    }
}

#[derive(Default)]
struct Links(RwLock<Vec<Link>>);

impl Links {
    fn new(links: Vec<Link>) -> Self {
        Links(RwLock::new(links))
    }

    async fn get(&self, if_index: u16) -> Option<LinkRef<'_>> {
        let links = self.0.read().await;
        let if_index = if_index as usize;
        if if_index >= links.len() {
            None
        } else {
            Some(LinkRef {
                guard: links,
                idx: if_index,
            })
        }
    }

    async fn get_mut(&self, if_index: u16) -> Option<LinkMutRef<'_>> {
        let links = self.0.write().await;
        let if_index = if_index as usize;
        if if_index >= links.len() {
            None
        } else {
            Some(LinkMutRef {
                guard: links,
                idx: if_index,
            })
        }
    }

    async fn find(&self, pred: impl Fn(&Link) -> bool) -> Option<LinkRef<'_>> {
        let links = self.0.read().await;
        let idx = links.iter().position(pred)?;
        Some(LinkRef { guard: links, idx })
    }

    async fn iter(&self) -> LinkIter<'_> {
        LinkIter {
            inner: self.0.read().await,
        }
    }
}

pub struct Link {
    dest_port: u16,
    peer: Ipv4Addr,
    interface_ip: Ipv4Addr,
    activated: bool,
    sock: Arc<UdpSocket>,
}

impl Link {
    /// Send a frame to the peer on this link.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        if !self.activated {
            return Err(Error::LinkInactive);
        }

        self.sock
            .send_to(payload, localhost_with_port(self.dest_port))
            .await
            .map_err(Error::Io)?;

        Ok(())
    }

    pub fn activate(&mut self) {
        self.activated = true;
    }

    pub fn deactivate(&mut self) {
        self.activated = false;
    }

    pub fn is_disabled(&self) -> bool {
        !self.activated
    }

    pub fn peer(&self) -> Ipv4Addr {
        self.peer
    }

    pub fn interface_ip(&self) -> Ipv4Addr {
        self.interface_ip
    }

    pub fn clone_socket(&self) -> Arc<UdpSocket> {
        self.sock.clone()
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.activated { "up" } else { "down" };
        write!(
            f,
            "{}\t{}\t{}\t{}",
            state, self.interface_ip, self.peer, self.dest_port
        )
    }
}
