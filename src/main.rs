//! RP2040 bring-up and the adapters that put the board behind the bridge's
//! traits

// Copyright (c) 2024 The H-RTK bridge firmware authors
//
// This file is part of the H-RTK bridge firmware.
//
// The H-RTK bridge firmware is free software: you can redistribute it and/or modify it under
// the terms only of version 3 of the GNU General Public License as published
// by the Free Software Foundation
//
// The H-RTK bridge firmware is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along with
// the H-RTK bridge firmware(in a file named COPYING).
// If not, see <https://www.gnu.org/licenses/>.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use cortex_m::delay::Delay;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::PwmPin;
use embedded_io::blocking::Write;
use fugit::RateExtU32;
use log::{info, warn, LevelFilter};
use rp2040_hal as hal;

use hal::clocks::Clock;
use hal::pac;
use hal::pio::PIOExt;
use hal::pwm::{FreeRunning, Pwm0, Slice};
use hal::uart::{DataBits, Enabled, StopBits, UartConfig, UartDevice, UartPeripheral, ValidUartPinout};
use hal::Timer;

use smart_leds::{SmartLedsWrite, RGB8};
use usb_device::class_prelude::{UsbBus, UsbBusAllocator};
use usb_device::prelude::{UsbDevice, UsbDeviceBuilder, UsbVidPid};
use usb_device::UsbError;
use usbd_serial::SerialPort;
use ws2812_pio::Ws2812;

use hrtk_bridge::config::{
    BridgeConfig, COMMAND_GAP_MS, I2C_FREQ_HZ, I2C_SCL_PIN, I2C_SDA_PIN, LED_RING_PIN,
    RECEIVER_BOOT_MS, UART_BAUDRATE, UART_RX_PIN, UART_TX_PIN,
};
use hrtk_bridge::errors::BridgeError;
use hrtk_bridge::ubx::{self, ConfigFrame};
use hrtk_bridge::{logger, Bridge, ByteLink, Instant, Ist8310, LedRing, NoiseFeedback, Tone};

#[link_section = ".boot2"]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

const XTAL_FREQ_HZ: u32 = 12_000_000u32;

// Raspberry Pi's VID, PID of the stock CDC serial
const USB_VID: u16 = 0x2E8A;
const USB_PID: u16 = 0x000A;

/// Startup "all good" blink
const READY_BLINK_MS: u32 = 500;

/// Either link failed in a way that isn't "try again later"
#[derive(Debug, Clone, Copy)]
pub struct LinkError;

impl embedded_io::Error for LinkError {
    fn kind(&self) -> embedded_io::ErrorKind {
        embedded_io::ErrorKind::Other
    }
}

/// UART0 to the receiver
struct ReceiverUart<D: UartDevice, P: ValidUartPinout<D>> {
    uart: UartPeripheral<Enabled, D, P>,
    /// A line error arrived along with good bytes, report it next poll
    error_pending: bool,
}

impl<D: UartDevice, P: ValidUartPinout<D>> embedded_io::Io for ReceiverUart<D, P> {
    type Error = LinkError;
}

impl<D: UartDevice, P: ValidUartPinout<D>> Write for ReceiverUart<D, P> {
    // Blocks until the FIFO takes everything. Callers never hand over more
    // than one USB packet, which drains in a few milliseconds.
    fn write(&mut self, buf: &[u8]) -> Result<usize, LinkError> {
        self.uart.write_full_blocking(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

impl<D: UartDevice, P: ValidUartPinout<D>> ByteLink for ReceiverUart<D, P> {
    fn poll_read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        if self.error_pending {
            self.error_pending = false;
            return Err(LinkError);
        }
        if !self.uart.uart_is_readable() {
            return Ok(0);
        }
        match self.uart.read_raw(buf) {
            Ok(n) => Ok(n),
            Err(nb::Error::WouldBlock) => Ok(0),
            // Overrun, break, parity and framing errors. What was read before
            // the bad byte is already at the front of `buf`.
            Err(nb::Error::Other(e)) => {
                let n = e.discarded.len();
                if n == 0 {
                    return Err(LinkError);
                }
                self.error_pending = true;
                Ok(n)
            }
        }
    }
}

/// USB CDC serial to the host
struct UsbHost<'a, B: UsbBus> {
    device: UsbDevice<'a, B>,
    serial: SerialPort<'a, B>,
}

impl<'a, B: UsbBus> UsbHost<'a, B> {
    /// Has to run at least every 10ms while enumerating
    fn poll(&mut self) -> bool {
        self.device.poll(&mut [&mut self.serial])
    }
}

impl<'a, B: UsbBus> embedded_io::Io for UsbHost<'a, B> {
    type Error = LinkError;
}

impl<'a, B: UsbBus> Write for UsbHost<'a, B> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, LinkError> {
        match self.serial.write(buf) {
            Ok(n) => Ok(n),
            Err(UsbError::WouldBlock) => Ok(0),
            Err(_) => Err(LinkError),
        }
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        match self.serial.flush() {
            Ok(()) | Err(UsbError::WouldBlock) => Ok(()),
            Err(_) => Err(LinkError),
        }
    }
}

impl<'a, B: UsbBus> ByteLink for UsbHost<'a, B> {
    fn poll_read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        if !self.poll() {
            return Ok(0);
        }
        match self.serial.read(buf) {
            Ok(n) => Ok(n),
            Err(UsbError::WouldBlock) => Ok(0),
            Err(_) => Err(LinkError),
        }
    }
}

/// WS2812 ring, every LED the same colour
struct Ws2812Ring<W> {
    leds: W,
    count: usize,
}

impl<W: SmartLedsWrite<Color = RGB8>> LedRing for Ws2812Ring<W> {
    fn fill(&mut self, color: RGB8) {
        let _ = self.leds.write(core::iter::repeat(color).take(self.count));
    }
}

/// Square wave on PWM0 A (GP16), 50% duty
struct PwmTone {
    slice: Slice<Pwm0, FreeRunning>,
    sys_hz: u32,
}

impl Tone for PwmTone {
    fn start(&mut self, freq_hz: u32) {
        if freq_hz == 0 {
            self.stop();
            return;
        }
        // Smallest integer divider that keeps TOP in 16 bits
        let cycles = self.sys_hz / freq_hz;
        let div = (cycles / 65_536 + 1).clamp(1, 255);
        let top = (cycles / div).saturating_sub(1).min(u16::MAX as u32) as u16;

        self.slice.set_div_int(div as u8);
        self.slice.set_div_frac(0);
        self.slice.set_top(top);
        self.slice.channel_a.set_duty(top / 2);
    }

    fn stop(&mut self) {
        self.slice.channel_a.set_duty(0);
    }
}

fn millis(timer: &Timer) -> Instant {
    Instant::from_ticks((timer.get_counter().ticks() / 1_000) as u32)
}

/// Startup wait that keeps USB enumeration alive
fn wait_ms<B: UsbBus>(timer: &Timer, host: &mut UsbHost<'_, B>, ms: u32) {
    let start = millis(timer);
    while hrtk_bridge::elapsed(millis(timer), start).ticks() < ms {
        host.poll();
    }
}

fn send_frame<R: Write>(receiver: &mut R, frame: Result<ConfigFrame, BridgeError>, what: &str) {
    match frame {
        Ok(frame) => match receiver.write_all(frame.as_bytes()) {
            Ok(()) => info!("{} enable sent", what),
            Err(_) => warn!("{} enable not sent, link error", what),
        },
        Err(e) => warn!("{} enable not built: {}", what, e),
    }
}

/// The entrypoint, everything starts here
#[rp2040_hal::entry]
fn main() -> ! {
    // ===================================================================== //
    // STEP 1, INITIALIZATION!                                               //
    // ===================================================================== //
    logger::init(LevelFilter::Info);

    let mut pac = pac::Peripherals::take().unwrap();
    let core = pac::CorePeripherals::take().unwrap();

    let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);

    let sio = hal::Sio::new(pac.SIO);

    let pins = hal::gpio::Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );

    let clocks = hal::clocks::init_clocks_and_plls(
        XTAL_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .unwrap();

    let timer = Timer::new(pac.TIMER, &mut pac.RESETS);
    let mut delay = Delay::new(core.SYST, clocks.system_clock.freq().to_Hz());

    let config = BridgeConfig::default();

    // Initialize GPIO
    let mut pin_led = pins.gpio25.into_push_pull_output();

    // Receiver on UART0, 8N1
    let uart_pins = (
        pins.gpio0.into_mode::<hal::gpio::FunctionUart>(),
        pins.gpio1.into_mode::<hal::gpio::FunctionUart>(),
    );
    let uart = UartPeripheral::new(pac.UART0, uart_pins, &mut pac.RESETS)
        .enable(
            UartConfig::new(UART_BAUDRATE.Hz(), DataBits::Eight, None, StopBits::One),
            clocks.peripheral_clock.freq(),
        )
        .unwrap();
    let mut receiver = ReceiverUart {
        uart,
        error_pending: false,
    };

    // Magnetometer on I2C0
    let pin_i2c0_sda = pins.gpio4.into_mode::<hal::gpio::FunctionI2C>();
    let pin_i2c0_scl = pins.gpio5.into_mode::<hal::gpio::FunctionI2C>();
    let i2c0 = hal::I2C::i2c0(
        pac.I2C0,
        pin_i2c0_sda,
        pin_i2c0_scl,
        I2C_FREQ_HZ.Hz(),
        &mut pac.RESETS,
        &clocks.system_clock,
    );

    // LED ring through PIO0
    let (mut pio, sm0, _, _, _) = pac.PIO0.split(&mut pac.RESETS);
    let ws = Ws2812::new(
        pins.gpio15.into_mode(),
        &mut pio,
        sm0,
        clocks.peripheral_clock.freq(),
        timer.count_down(),
    );
    let ring = Ws2812Ring {
        leds: ws,
        count: config.led_count,
    };

    // Buzzer on PWM0 A
    let pwm_slices = hal::pwm::Slices::new(pac.PWM, &mut pac.RESETS);
    let mut buzzer_pwm = pwm_slices.pwm0;
    buzzer_pwm.enable();
    let _pin_buzzer = buzzer_pwm.channel_a.output_to(pins.gpio16);
    buzzer_pwm.channel_a.set_duty(0);
    let tone = PwmTone {
        slice: buzzer_pwm,
        sys_hz: clocks.system_clock.freq().to_Hz(),
    };

    // USB CDC to the host
    let usb_bus = UsbBusAllocator::new(hal::usb::UsbBus::new(
        pac.USBCTRL_REGS,
        pac.USBCTRL_DPRAM,
        clocks.usb_clock,
        true,
        &mut pac.RESETS,
    ));
    let serial = SerialPort::new(&usb_bus);
    let device = UsbDeviceBuilder::new(&usb_bus, UsbVidPid(USB_VID, USB_PID))
        .manufacturer("H-RTK")
        .product("GPS Bridge")
        .serial_number("0001")
        .device_class(usbd_serial::USB_CLASS_CDC)
        .build();
    let mut host = UsbHost { device, serial };

    info!("H-RTK GPS bridge");
    info!(
        "UART: {}bps (GP{}/GP{})",
        UART_BAUDRATE, UART_TX_PIN, UART_RX_PIN
    );
    info!(
        "I2C: {}Hz (GP{}/GP{})",
        I2C_FREQ_HZ, I2C_SDA_PIN, I2C_SCL_PIN
    );
    info!("LED ring: {} on GP{}", config.led_count, LED_RING_PIN);

    // ===================================================================== //
    // STEP 2, CONFIGURE THE RECEIVER                                        //
    // ===================================================================== //

    // Give the receiver time to boot before it gets talked to
    wait_ms(&timer, &mut host, RECEIVER_BOOT_MS);

    send_frame(&mut receiver, ubx::enable_esf_raw(), "ESF-RAW");
    wait_ms(&timer, &mut host, COMMAND_GAP_MS);
    send_frame(&mut receiver, ubx::enable_esf_meas(), "ESF-MEAS");
    wait_ms(&timer, &mut host, COMMAND_GAP_MS);

    if config.enable_nmea_on_boot {
        for (id, name) in [
            (ubx::id::NMEA_GGA, "GGA"),
            (ubx::id::NMEA_RMC, "RMC"),
            (ubx::id::NMEA_VTG, "VTG"),
        ] {
            send_frame(&mut receiver, ubx::enable_nmea_on_uart1(id), name);
            wait_ms(&timer, &mut host, COMMAND_GAP_MS);
        }
    }

    // A missing sensor only costs the $PIMAG sentence, keep bridging
    let mut magnetometer = Ist8310::new(i2c0);
    if let Err(e) = magnetometer.initialize(&mut delay) {
        warn!("{}, running without magnetometer", e);
    }

    info!("Bridge up (UART <-> USB CDC)");

    // Blink once to say we made it
    pin_led.set_high().unwrap();
    wait_ms(&timer, &mut host, READY_BLINK_MS);
    pin_led.set_low().unwrap();

    // ===================================================================== //
    // EXECUTION LOOP                                                        //
    // ===================================================================== //
    let feedback = NoiseFeedback::new(ring, tone, config.led_brightness_pct);
    let mut bridge = Bridge::new(
        receiver,
        host,
        magnetometer,
        pin_led,
        feedback,
        config,
        millis(&timer),
    );

    // Startup log goes out ahead of any receiver traffic, then the stream
    // stays clean for the host's parser
    logger::drain(|text| {
        bridge.push_host_record(text.as_bytes());
    });
    logger::set_level(LevelFilter::Off);

    loop {
        bridge.poll(millis(&timer));
    }
}

#[panic_handler]
fn panic(_panic_info: &PanicInfo) -> ! {
    unsafe {
        let mut pac = pac::Peripherals::steal();
        let core = pac::CorePeripherals::steal();

        let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);

        let clocks = hal::clocks::init_clocks_and_plls(
            XTAL_FREQ_HZ,
            pac.XOSC,
            pac.CLOCKS,
            pac.PLL_SYS,
            pac.PLL_USB,
            &mut pac.RESETS,
            &mut watchdog,
        )
        .ok()
        .unwrap();

        let sio = hal::Sio::new(pac.SIO);

        let pins = hal::gpio::Pins::new(
            pac.IO_BANK0,
            pac.PADS_BANK0,
            sio.gpio_bank0,
            &mut pac.RESETS,
        );

        let mut pin_led = pins.gpio25.into_push_pull_output();

        let mut delay = Delay::new(core.SYST, clocks.system_clock.freq().to_Hz());

        // Flash it at 5hz until someone power cycles us
        loop {
            pin_led.set_high().unwrap_unchecked();
            delay.delay_ms(100);
            pin_led.set_low().unwrap_unchecked();
            delay.delay_ms(100);
        }
    }
}
