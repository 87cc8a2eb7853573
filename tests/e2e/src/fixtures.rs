//! Shared fixtures: a small firmware drop with two libraries.
//!
//! "alpha" carries two kernels (the first with all three phases, the
//! second exec-only) and sections across several memory classes; "beta"
//! carries one kernel and a single text section. Addresses are fixed so
//! scenarios can assert exact loader-output words.

use alloc::vec;
use alloc::vec::Vec;

use orca_dl::sim::SimEnvironment;
use orca_dl::{Aperture, LinkTable, ObjectImage, Section, SectionFlags};

/// Search path the manager is initialised with.
pub const BASE_PATH: &str = "/vendor/firmware/orca";

pub const ALPHA_PRE: u32 = 0x1000;
pub const ALPHA_EXE: u32 = 0x1004;
pub const ALPHA_POST: u32 = 0x1008;
pub const ALPHA2_EXE: u32 = 0x1010;
pub const BETA_EXE: u32 = 0x2000;

/// Metadata block covering both libraries.
pub fn session_metadata() -> &'static [u8] {
    b"<libs><count>2</count>\
        <lib><name>alpha</name><count>2</count>\
          <kernel><id>0</id><pre>alpha_pre</pre><exe>alpha_exe</exe><post>alpha_post</post></kernel>\
          <kernel><id>1</id><exe>alpha2_exe</exe></kernel>\
        </lib>\
        <lib><name>beta</name><count>1</count>\
          <kernel><id>0</id><exe>beta_exe</exe></kernel>\
        </lib>\
      </libs>"
}

fn section(index: u16, aperture: Aperture, flags: SectionFlags, data: Vec<u8>) -> Section {
    let size = data.len() as u32;
    Section {
        index,
        aperture,
        flags,
        data,
        size,
    }
}

fn alpha_image() -> (ObjectImage, LinkTable) {
    let image = ObjectImage {
        sections: vec![
            section(
                0,
                Aperture::Program,
                SectionFlags::EXEC | SectionFlags::INIT,
                vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
            ),
            section(
                1,
                Aperture::Data,
                SectionFlags::INIT | SectionFlags::WRITE,
                vec![0x10, 0x20, 0x30, 0x40],
            ),
            section(
                2,
                Aperture::SharedSfr,
                SectionFlags::INIT,
                vec![0xDE, 0xAD, 0xBE, 0xEF],
            ),
            // Writable, uninitialized: zero-filled at load.
            Section {
                index: 3,
                aperture: Aperture::Tcm,
                flags: SectionFlags::WRITE,
                data: Vec::new(),
                size: 16,
            },
        ],
    };

    let mut link = LinkTable::new();
    link.set_section_offset(0, 0x00);
    link.set_section_offset(1, 0x100);
    link.set_section_offset(2, 0x40);
    link.set_section_offset(3, 0x80);
    link.define_symbol("alpha_pre", ALPHA_PRE);
    link.define_symbol("alpha_exe", ALPHA_EXE);
    link.define_symbol("alpha_post", ALPHA_POST);
    link.define_symbol("alpha2_exe", ALPHA2_EXE);
    (image, link)
}

fn beta_image() -> (ObjectImage, LinkTable) {
    let image = ObjectImage {
        sections: vec![section(
            0,
            Aperture::Program,
            SectionFlags::EXEC | SectionFlags::INIT,
            vec![0xAA, 0xBB, 0xCC, 0xDD],
        )],
    };

    let mut link = LinkTable::new();
    link.set_section_offset(0, 0x00);
    link.define_symbol("beta_exe", BETA_EXE);
    (image, link)
}

/// A simulated environment with both libraries installed. The zero-fill
/// target aperture arrives smeared so cleared bytes are observable.
pub fn demo_environment() -> SimEnvironment {
    let mut env = SimEnvironment::new();
    let (image, link) = alpha_image();
    env.install("alpha", image, link);
    let (image, link) = beta_image();
    env.install("beta", image, link);
    env.target.smear(Aperture::Tcm, 0x5A);
    env
}
