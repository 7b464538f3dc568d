//! Second-stage boot sequence.

use log::{debug, info};

use bootcore::banked::read_psram_banked;
use bootcore::boot_info::{Patches, ProgFlags, ProgFlags2};
use bootcore::regs::{
    self, PowCnt, IO_DISPLAY_CTRL, IO_HWINT_ACK, IO_LCD_LINE, IO_LCD_SEG, IO_NILE_EMU_CNT, IO_NILE_POW_CNT,
    IO_NILE_SEG_MASK, IO_SYSTEM_CTRL1, LCD_SEG_ORIENT_H, LCD_SEG_ORIENT_V, SYSTEM_CTRL1_BUS_MASK, VBLANK_LINE,
};
use bootcore::{BlockDevice, BootDescriptor, FarPtr, ImageLayout, Progress, Result, StreamConfig, Volume};

use crate::{apply_soft_reset_patch, Hardware};

/// Read and check the descriptor the menu left in internal RAM.
pub fn read_descriptor<H: Hardware + ?Sized>(hw: &mut H) -> Result<BootDescriptor> {
    let mut bytes = [0u8; BootDescriptor::SIZE];
    hw.read_iram(BootDescriptor::ADDRESS, &mut bytes);
    let descriptor = BootDescriptor::decode(&bytes)?;
    descriptor.validate()?;
    Ok(descriptor)
}

/// Stream the image into PSRAM at its place in `layout`.
///
/// Images the menu already placed in PSRAM are left as they are.
pub fn load_image<D, H, P>(
    device: D,
    hw: &mut H,
    descriptor: &BootDescriptor,
    layout: &ImageLayout,
    progress: &mut P,
) -> Result<()>
where
    D: BlockDevice,
    H: Hardware + ?Sized,
    P: Progress + ?Sized,
{
    if descriptor.is_resident() {
        debug!("boot: image already resident");
        return Ok(());
    }

    debug!(
        "boot: loading {:#x} bytes from cluster {} to bank {:#06x}",
        descriptor.prog.size,
        descriptor.prog.cluster,
        layout.start().bank
    );
    let mut volume = Volume::new(device, descriptor.geometry, StreamConfig::default());
    let mut stream = volume.open(descriptor.prog.cluster);
    read_psram_banked(&mut stream, hw, layout.start(), descriptor.prog.size, progress)
}

/// Program the cartridge and system registers for the image.
///
/// POW_CNT switches the cartridge registers off, so it is written last.
pub fn configure_cartridge<H: Hardware + ?Sized>(hw: &mut H, descriptor: &BootDescriptor) {
    hw.set_flash_enabled(false);
    hw.release_storage();

    while hw.inb(IO_LCD_LINE) != VBLANK_LINE {}
    hw.outw(IO_DISPLAY_CTRL, 0);
    hw.outb(IO_LCD_SEG, 0);

    hw.restore_cold_boot_state(!descriptor.flags2.contains(ProgFlags2::COLOR));

    let ctrl1 = hw.inb(IO_SYSTEM_CTRL1);
    hw.outb(
        IO_SYSTEM_CTRL1,
        (ctrl1 & !SYSTEM_CTRL1_BUS_MASK) | (descriptor.flags.bits() & SYSTEM_CTRL1_BUS_MASK),
    );
    hw.outw(IO_NILE_SEG_MASK, regs::seg_mask(descriptor.rom_banks, descriptor.sram_mask));
    hw.outb(IO_NILE_EMU_CNT, descriptor.emu_cnt);

    let pow = PowCnt::from_bits_retain(hw.inb(IO_NILE_POW_CNT)) & PowCnt::MCU_RESET;
    hw.outb(IO_NILE_POW_CNT, (pow | descriptor.pow_cnt).bits());
    hw.outb(IO_HWINT_ACK, 0xFF);
}

/// Everything up to the jump. Returns the jump target.
pub fn boot<D, H, P>(device: D, hw: &mut H, progress: &mut P) -> Result<FarPtr>
where
    D: BlockDevice,
    H: Hardware + ?Sized,
    P: Progress + ?Sized,
{
    let descriptor = read_descriptor(hw)?;
    let layout = ImageLayout::for_size(descriptor.prog.size)?;

    let orientation = if descriptor.flags.contains(ProgFlags::VERTICAL) {
        LCD_SEG_ORIENT_V
    } else {
        LCD_SEG_ORIENT_H
    };
    hw.outb(IO_LCD_SEG, orientation);

    load_image(device, hw, &descriptor, &layout, progress)?;

    if descriptor.patches.contains(Patches::FREYA_SOFT_RESET) {
        apply_soft_reset_patch(hw, &layout)?;
    }

    configure_cartridge(hw, &descriptor);
    info!("boot: starting image at {}", descriptor.start_pointer);
    Ok(descriptor.start_pointer)
}

/// Second-stage entry point.
pub fn run<D, H, P>(device: D, hw: &mut H, progress: &mut P) -> !
where
    D: BlockDevice,
    H: Hardware + ?Sized,
    P: Progress + ?Sized,
{
    match boot(device, hw, progress) {
        Ok(target) => hw.cold_jump(target),
        Err(err) => hw.halt_with_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootcore::boot_info::{ProgramInfo, CLUSTER_AT_PSRAM, COLD_BOOT_VECTOR, OFF_START_POINTER};
    use bootcore::mock::{FatImage, MemDisk, MockCart};
    use bootcore::{BankPort, BankedMemory, Error, FsType, NoProgress, Ports, VolumeGeometry};
    use core::ops::ControlFlow;

    static PATCH: [u8; 8] = [0xEA, 0x00, 0x00, 0x00, 0xF0, 0x90, 0x90, 0x90];

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        ReleaseStorage,
        ColdBoot { disable_color: bool },
    }

    struct TestHardware {
        cart: MockCart,
        events: Vec<Event>,
        patch: &'static [u8],
    }

    impl TestHardware {
        fn new(psram_banks: u16) -> Self {
            Self {
                cart: MockCart::new(psram_banks, 4),
                events: Vec::new(),
                patch: &PATCH,
            }
        }

        fn install(&mut self, descriptor: &BootDescriptor) {
            let at = BootDescriptor::ADDRESS as usize;
            self.cart.iram[at..at + BootDescriptor::SIZE].copy_from_slice(&descriptor.encode());
        }
    }

    impl Ports for TestHardware {
        fn inb(&mut self, port: u16) -> u8 {
            self.cart.inb(port)
        }

        fn outb(&mut self, port: u16, value: u8) {
            self.cart.outb(port, value);
        }
    }

    impl BankedMemory for TestHardware {
        fn bank(&self, port: BankPort) -> u16 {
            self.cart.bank(port)
        }

        fn set_bank(&mut self, port: BankPort, bank: u16) {
            self.cart.set_bank(port, bank);
        }

        fn flash_enabled(&self) -> bool {
            self.cart.flash_enabled()
        }

        fn set_flash_enabled(&mut self, enabled: bool) {
            self.cart.set_flash_enabled(enabled);
        }

        fn window(&mut self, port: BankPort) -> &mut [u8] {
            self.cart.window(port)
        }
    }

    impl Hardware for TestHardware {
        fn read_iram(&mut self, address: u16, buf: &mut [u8]) {
            let at = address as usize;
            buf.copy_from_slice(&self.cart.iram[at..at + buf.len()]);
        }

        fn write_iram(&mut self, address: u16, bytes: &[u8]) {
            let at = address as usize;
            self.cart.iram[at..at + bytes.len()].copy_from_slice(bytes);
        }

        fn release_storage(&mut self) {
            self.events.push(Event::ReleaseStorage);
        }

        fn restore_cold_boot_state(&mut self, disable_color: bool) {
            self.events.push(Event::ColdBoot { disable_color });
        }

        fn soft_reset_patch(&self) -> &'static [u8] {
            self.patch
        }

        fn cold_jump(&mut self, target: FarPtr) -> ! {
            panic!("cold jump to {}", target);
        }

        fn halt_with_error(&mut self, error: Error) -> ! {
            panic!("halted: {}", error);
        }
    }

    fn descriptor(geometry: VolumeGeometry, cluster: u32, size: u32) -> BootDescriptor {
        BootDescriptor {
            geometry,
            prog: ProgramInfo { cluster, size },
            rom_banks: ImageLayout::for_size(size).unwrap().total_banks(),
            sram_mask: 0,
            pow_cnt: PowCnt::SRAM | PowCnt::IO_2003,
            emu_cnt: 0,
            flags: ProgFlags::BUS_16BIT,
            flags2: ProgFlags2::empty(),
            patches: Patches::empty(),
            start_pointer: COLD_BOOT_VECTOR,
        }
    }

    fn resident_geometry() -> VolumeGeometry {
        VolumeGeometry::new(FsType::Fat16, 1, 2, 1, 100).unwrap()
    }

    #[test]
    fn test_image_right_aligned_across_banks() {
        let _ = env_logger::builder().is_test(true).try_init();
        let size = 0x1_2000u32;
        let mut image = FatImage::new(FsType::Fat16, 8, 200);
        let chain: Vec<u32> = (2..20).collect();
        image.link(&chain);
        let data = image.file_bytes(&chain);
        let mut hw = TestHardware::new(4);
        hw.install(&descriptor(image.geometry, 2, size));

        let mut ticks = Vec::new();
        let mut progress = |done: u32, total: u32| {
            ticks.push((done, total));
            ControlFlow::Continue(())
        };
        let target = boot(image.disk, &mut hw, &mut progress).unwrap();

        assert_eq!(target, COLD_BOOT_VECTOR);
        assert_eq!(&hw.cart.psram_bank(0)[0xE000..], &data[..0x2000]);
        assert_eq!(&hw.cart.psram_bank(1)[..], &data[0x2000..size as usize]);
        assert!(hw.cart.psram_bank(0)[..0xE000].iter().all(|&b| b == 0xFF));
        assert_eq!(ticks.len() as u32, ImageLayout::for_size(size).unwrap().chunk_count());
        assert_eq!(ticks.last(), Some(&(size, size)));
    }

    #[test]
    fn test_resident_image_skips_storage() {
        let mut disk = MemDisk::zeroed(4);
        let mut hw = TestHardware::new(16);
        hw.install(&descriptor(resident_geometry(), CLUSTER_AT_PSRAM, 0x10_0000));

        boot(&mut disk, &mut hw, &mut NoProgress).unwrap();

        assert!(disk.reads.is_empty());
        assert!(hw.cart.bank_selects(BankPort::Ram).is_empty());
    }

    #[test]
    fn test_register_sequence() {
        let mut image = FatImage::new(FsType::Fat16, 1, 200);
        image.link(&[2, 3]);
        let mut hw = TestHardware::new(4);
        hw.cart.ports[IO_NILE_POW_CNT as usize] = 0xFF;
        hw.cart.ports[IO_SYSTEM_CTRL1 as usize] = 0x8D;
        let mut d = descriptor(image.geometry, 2, 1024);
        d.flags2 = ProgFlags2::COLOR;
        d.emu_cnt = 0x02;
        hw.install(&d);

        boot(image.disk, &mut hw, &mut NoProgress).unwrap();

        assert_eq!(
            hw.cart.port_log,
            vec![
                (IO_LCD_SEG, LCD_SEG_ORIENT_H),
                (IO_DISPLAY_CTRL, 0),
                (IO_DISPLAY_CTRL + 1, 0),
                (IO_LCD_SEG, 0),
                (IO_SYSTEM_CTRL1, 0x85),
                (IO_NILE_SEG_MASK, 0x00),
                (IO_NILE_SEG_MASK + 1, 0x0E),
                (IO_NILE_EMU_CNT, 0x02),
                (IO_NILE_POW_CNT, 0x80 | 0x50),
                (IO_HWINT_ACK, 0xFF),
            ]
        );
        assert_eq!(
            hw.events,
            vec![Event::ReleaseStorage, Event::ColdBoot { disable_color: false }]
        );
        assert!(!hw.cart.flash_enabled());
    }

    #[test]
    fn test_vertical_orientation() {
        let mut hw = TestHardware::new(1);
        let mut d = descriptor(resident_geometry(), CLUSTER_AT_PSRAM, 0x1_0000);
        d.flags |= ProgFlags::VERTICAL;
        hw.install(&d);

        boot(MemDisk::zeroed(1), &mut hw, &mut NoProgress).unwrap();
        assert_eq!(hw.cart.port_log[0], (IO_LCD_SEG, LCD_SEG_ORIENT_V));
        assert_eq!(hw.events[1], Event::ColdBoot { disable_color: true });
    }

    fn freya_hardware() -> TestHardware {
        let mut hw = TestHardware::new(16);
        let last = hw.cart.psram_bank_mut(15);
        last[0xFFF0..0xFFF5].copy_from_slice(&[0xEA, 0x10, 0x00, 0x00, 0x40]);
        let mut d = descriptor(resident_geometry(), CLUSTER_AT_PSRAM, 0x10_0000);
        d.patches = Patches::FREYA_SOFT_RESET;
        hw.install(&d);
        hw
    }

    #[test]
    fn test_soft_reset_patch_applied() {
        let mut hw = freya_hardware();
        let target = boot(MemDisk::zeroed(1), &mut hw, &mut NoProgress).unwrap();

        assert_eq!(target, COLD_BOOT_VECTOR);
        let last = hw.cart.psram_bank(15);
        assert_eq!(&last[0xFFC8..0xFFD0], &PATCH[..]);
        assert_eq!(&last[0xFFF1..0xFFF5], &[0xC8, 0xFF, 0x00, 0xF0]);

        let at = BootDescriptor::ADDRESS as usize + OFF_START_POINTER;
        assert_eq!(&hw.cart.iram[at..at + 4], &[0x10, 0x00, 0x00, 0x40]);
        assert_eq!(hw.cart.bank(BankPort::Ram), 0);
    }

    #[test]
    fn test_soft_reset_patch_skipped_when_area_used() {
        let mut hw = freya_hardware();
        hw.cart.psram_bank_mut(15)[0xFF90] = 0x12;

        boot(MemDisk::zeroed(1), &mut hw, &mut NoProgress).unwrap();

        let last = hw.cart.psram_bank(15);
        assert!(last[0xFFC8..0xFFF0].iter().all(|&b| b == 0xFF));
        assert_eq!(&last[0xFFF1..0xFFF5], &[0x10, 0x00, 0x00, 0x40]);
        let at = BootDescriptor::ADDRESS as usize + OFF_START_POINTER;
        assert_eq!(&hw.cart.iram[at..at + 4], &COLD_BOOT_VECTOR.to_bytes());
    }

    #[test]
    fn test_oversized_patch_rejected() {
        static LONG: [u8; 0x29] = [0x90; 0x29];
        let mut hw = freya_hardware();
        hw.patch = &LONG;
        let layout = ImageLayout::for_size(0x10_0000).unwrap();
        assert_eq!(apply_soft_reset_patch(&mut hw, &layout), Err(Error::FileTooLarge));
    }

    #[test]
    fn test_storage_error_stops_before_registers() {
        let mut image = FatImage::new(FsType::Fat16, 1, 200);
        image.link(&[2, 3]);
        image.disk.fail_reads_at = image.geometry.cluster_to_sector(3);
        let mut hw = TestHardware::new(4);
        hw.install(&descriptor(image.geometry, 2, 1024));

        assert_eq!(boot(image.disk, &mut hw, &mut NoProgress), Err(Error::Device(0x01)));
        assert!(hw.events.is_empty());
        assert_eq!(hw.cart.port_writes(IO_NILE_POW_CNT), Vec::<u8>::new());
    }

    #[test]
    fn test_corrupt_descriptor_rejected() {
        let mut hw = TestHardware::new(4);
        assert_eq!(read_descriptor(&mut hw), Err(Error::InvalidGeometry));
    }

    #[test]
    #[should_panic(expected = "halted: image format is invalid")]
    fn test_run_halts_on_error() {
        let mut hw = TestHardware::new(4);
        let mut d = descriptor(resident_geometry(), CLUSTER_AT_PSRAM, 0x1_0000);
        d.prog.size = 0;
        hw.install(&d);
        run(MemDisk::zeroed(1), &mut hw, &mut NoProgress);
    }

    #[test]
    #[should_panic(expected = "cold jump to FFFF:0000")]
    fn test_run_jumps_to_start_pointer() {
        let mut hw = TestHardware::new(1);
        hw.install(&descriptor(resident_geometry(), CLUSTER_AT_PSRAM, 0x1_0000));
        run(MemDisk::zeroed(1), &mut hw, &mut NoProgress);
    }
}
