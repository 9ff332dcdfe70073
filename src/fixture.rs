//! Canned topologies for tests.

use std::net::Ipv4Addr;

use rand::{thread_rng, Rng};

use crate::args::{Args, LinkDefinition};
use crate::route::{Interface, InterfaceTable};

/// A router with interfaces 0..4 addressed 10.0.N.1/24, peered with
/// 10.0.N.2.
pub fn four_port_router() -> InterfaceTable {
    InterfaceTable::new(
        (0..4u16)
            .map(|i| {
                Interface::new(
                    i,
                    Ipv4Addr::new(10, 0, i as u8, 1),
                    24,
                    Ipv4Addr::new(10, 0, i as u8, 2),
                )
            })
            .collect(),
    )
}

/// Two directly-cabled single-interface routers on unique localhost ports,
/// for exercising the UDP link layer.
pub struct BackToBack {
    pub a: Args,
    pub b: Args,
}

/// A two-router chain where `b` also owns a stub network (192.168.1.0/24)
/// behind a dead port, so `a` has something to learn over RIP.
pub struct Chain {
    pub a: Args,
    pub b: Args,
}

pub fn chain() -> Chain {
    let mut rng = thread_rng();
    let port_a: u16 = rng.gen_range(16_384..60_000);
    let port_b = port_a + 1;
    let port_dead = port_a + 2;

    let a = Args::new(
        port_a,
        vec![LinkDefinition {
            dest_port: port_b,
            interface_ip: Ipv4Addr::new(192, 168, 0, 1),
            prefix_len: 24,
            dest_ip: Ipv4Addr::new(192, 168, 0, 2),
        }],
    );
    let b = Args::new(
        port_b,
        vec![
            LinkDefinition {
                dest_port: port_a,
                interface_ip: Ipv4Addr::new(192, 168, 0, 2),
                prefix_len: 24,
                dest_ip: Ipv4Addr::new(192, 168, 0, 1),
            },
            LinkDefinition {
                dest_port: port_dead,
                interface_ip: Ipv4Addr::new(192, 168, 1, 1),
                prefix_len: 24,
                dest_ip: Ipv4Addr::new(192, 168, 1, 2),
            },
        ],
    );

    Chain { a, b }
}

pub fn back_to_back() -> BackToBack {
    let mut rng = thread_rng();
    let port_a: u16 = rng.gen_range(16_384..60_000);
    let port_b = port_a + 1;

    let a = Args::new(
        port_a,
        vec![LinkDefinition {
            dest_port: port_b,
            interface_ip: Ipv4Addr::new(192, 168, 0, 1),
            prefix_len: 24,
            dest_ip: Ipv4Addr::new(192, 168, 0, 2),
        }],
    );
    let b = Args::new(
        port_b,
        vec![LinkDefinition {
            dest_port: port_a,
            interface_ip: Ipv4Addr::new(192, 168, 0, 2),
            prefix_len: 24,
            dest_ip: Ipv4Addr::new(192, 168, 0, 1),
        }],
    );

    BackToBack { a, b }
}
