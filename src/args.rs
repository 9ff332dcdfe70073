use std::{
    fmt::Display,
    fs::File,
    io::{BufRead, BufReader},
    net::Ipv4Addr,
    sync::Arc,
};

use crate::route::{Interface, InterfaceTable};

/// Input to a router; establishes its fixed set of interfaces.
///
/// Link file format: a first line `<host> <port>`, then one line per
/// interface: `<host> <dest_port> <interface_ip>/<prefix_len> <dest_ip>`.
/// The interface index is the line's position.
#[derive(Debug, PartialEq, Eq)]
pub struct Args {
    /// The port where this router listens.
    pub host_port: u16,
    /// Interfaces in index order.
    pub links: Vec<LinkDefinition>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinkDefinition {
    /// The port where the connected host runs.
    pub dest_port: u16,
    /// The address of this router's interface.
    pub interface_ip: Ipv4Addr,
    /// Mask length of the directly connected network.
    pub prefix_len: u8,
    /// The address of the connected host's interface.
    pub dest_ip: Ipv4Addr,
}

#[derive(Debug)]
pub enum ParseLinkError {
    NoIp,
    NoPort,
    NoSrcAddr,
    NoDstAddr,
    MalformedPort,
    MalformedAddr,
    MalformedPrefixLen,
    PrefixLenOutOfRange(u8),
}

impl LinkDefinition {
    pub fn try_parse(raw_link: &str) -> Result<Self, ParseLinkError> {
        let mut split = raw_link.split_whitespace();

        split.next().ok_or(ParseLinkError::NoIp)?;

        let dest_port = split
            .next()
            .ok_or(ParseLinkError::NoPort)?
            .parse::<u16>()
            .map_err(|_| ParseLinkError::MalformedPort)?;

        let addr_and_len = split.next().ok_or(ParseLinkError::NoSrcAddr)?;
        let (addr, len) = addr_and_len
            .split_once('/')
            .ok_or(ParseLinkError::MalformedPrefixLen)?;
        let interface_ip = addr.parse().map_err(|_| ParseLinkError::MalformedAddr)?;
        let prefix_len = len
            .parse::<u8>()
            .map_err(|_| ParseLinkError::MalformedPrefixLen)?;
        if prefix_len > 32 {
            return Err(ParseLinkError::PrefixLenOutOfRange(prefix_len));
        }

        let dest_ip = split
            .next()
            .ok_or(ParseLinkError::NoDstAddr)?
            .parse()
            .map_err(|_| ParseLinkError::MalformedAddr)?;

        Ok(LinkDefinition {
            dest_port,
            interface_ip,
            prefix_len,
            dest_ip,
        })
    }
}

#[derive(Debug)]
pub enum ParseArgsError {
    MissingFirstLine,
    NoHost,
    NoPort,
    NoLinks,
    MalformedPort,
    MalformedLink(ParseLinkError),
    ReadLineError(std::io::Error),
    OpenLinkFileError(std::io::Error),
    MissingLinkFileArg,
}

impl Args {
    pub fn new(host_port: u16, links: Vec<LinkDefinition>) -> Self {
        Self { host_port, links }
    }

    pub fn try_parse<B>(reader: B) -> Result<Args, ParseArgsError>
    where
        B: BufRead,
    {
        let mut lines = reader.lines();
        let host_ip_port = lines
            .next()
            .ok_or(ParseArgsError::MissingFirstLine)?
            .map_err(ParseArgsError::ReadLineError)?;

        let mut ip_port = host_ip_port.split_whitespace();
        // ignored: assume localhost
        let _ip = ip_port.next().ok_or(ParseArgsError::NoHost)?;
        let port = ip_port
            .next()
            .ok_or(ParseArgsError::NoPort)?
            .parse::<u16>()
            .map_err(|_| ParseArgsError::MalformedPort)?;

        let mut links = Vec::new();
        for line in lines {
            let raw_link = line.map_err(ParseArgsError::ReadLineError)?;
            links.push(
                LinkDefinition::try_parse(raw_link.as_str())
                    .map_err(ParseArgsError::MalformedLink)?,
            );
        }

        if links.is_empty() {
            return Err(ParseArgsError::NoLinks);
        }

        Ok(Args {
            host_port: port,
            links,
        })
    }

    pub fn get_my_interface_ips(&self) -> Vec<Ipv4Addr> {
        self.links.iter().map(|l| l.interface_ip).collect()
    }

    /// The immutable interface table this configuration describes.
    pub fn interfaces(&self) -> Arc<InterfaceTable> {
        Arc::new(InterfaceTable::new(
            self.links
                .iter()
                .enumerate()
                .map(|(i, l)| Interface::new(i as u16, l.interface_ip, l.prefix_len, l.dest_ip))
                .collect(),
        ))
    }
}

impl TryFrom<std::env::Args> for Args {
    type Error = ParseArgsError;

    fn try_from(mut args: std::env::Args) -> Result<Self, Self::Error> {
        if args.len() < 2 {
            return Err(ParseArgsError::MissingLinkFileArg);
        }

        let link_file_path = match args.nth(1) {
            Some(p) => p,
            None => return Err(ParseArgsError::MissingLinkFileArg),
        };
        let br =
            BufReader::new(File::open(link_file_path).map_err(ParseArgsError::OpenLinkFileError)?);

        Args::try_parse(br)
    }
}

impl Display for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Running on port {}", self.host_port)?;
        for (lnk_no, lnk) in self.links.iter().enumerate() {
            write!(
                f,
                "\n{}: {}/{} -> {}",
                lnk_no, lnk.interface_ip, lnk.prefix_len, lnk.dest_ip
            )?;
        }
        Ok(())
    }
}
