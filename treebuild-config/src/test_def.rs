// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{InvalidCompositeStep, NeedsError},
    flags::CapabilityFlags,
};
use camino::Utf8PathBuf;

/// The device-side binary used to start a test port from an Android shell.
pub const TEST_CONTROL_BINARY: &str = "/vendor/bin/trusty-ut-ctrl";

/// A test declared in a build config.
///
/// The set of variants is closed: the execution engine dispatches over it exhaustively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestDef {
    /// A command run on the host from the project's build directory.
    Host(HostTest),

    /// A test port, run by booting the test environment.
    Port(PortTest),

    /// A command run by the test environment, produced by `boottests`, `androidtest` and
    /// `androidporttests`.
    Device(DeviceTest),

    /// An ordered, fail-fast sequence of tests.
    Composite(CompositeTest),

    /// Restarts the test environment. Only valid inside a [`CompositeTest`].
    Reboot,
}

impl TestDef {
    /// The name used to filter and report this test.
    pub fn name(&self) -> &str {
        match self {
            Self::Host(test) => &test.name,
            Self::Port(test) => &test.port,
            Self::Device(test) => &test.name,
            Self::Composite(test) => &test.name,
            Self::Reboot => "reboot command",
        }
    }

    /// Whether this test runs by default.
    pub fn enabled(&self) -> bool {
        match self {
            Self::Host(test) => test.enabled,
            Self::Port(test) => test.enabled,
            Self::Device(test) => test.enabled,
            Self::Composite(test) => test.enabled,
            Self::Reboot => true,
        }
    }

    /// The capabilities this test needs, or `None` for host tests, which never run inside a test
    /// environment.
    pub fn need(&self) -> Option<CapabilityFlags> {
        match self {
            Self::Host(_) => None,
            Self::Port(test) => Some(test.need),
            Self::Device(test) => Some(test.need),
            Self::Composite(test) => Some(test.need),
            Self::Reboot => Some(CapabilityFlags::empty()),
        }
    }

    /// Returns true if this test can run in an environment that provides `provide`.
    ///
    /// Host tests never match; reboot markers always do.
    pub fn matches_provide(&self, provide: CapabilityFlags) -> bool {
        self.need()
            .is_some_and(|need| need.matches_provide(provide))
    }

    /// Adds or removes needed capabilities, as `.needs(...)` does in build configs.
    pub fn set_needs(&mut self, flags: &[(&str, bool)]) -> Result<(), NeedsError> {
        let kind = self.kind_name();
        let need = match self {
            Self::Port(test) => &mut test.need,
            Self::Device(test) => &mut test.need,
            Self::Host(_) | Self::Composite(_) | Self::Reboot => {
                return Err(NeedsError::NotSupported { kind });
            }
        };
        for (name, value) in flags {
            need.set_named(name, *value)?;
        }
        Ok(())
    }

    /// A short description of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Host(_) => "host test",
            Self::Port(_) => "port test",
            Self::Device(_) => "device test",
            Self::Composite(_) => "composite test",
            Self::Reboot => "reboot command",
        }
    }
}

/// A command run on the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostTest {
    /// The test name, `host-test:<cmd>`.
    pub name: String,
    /// The command line, relative to the project build directory.
    pub argv: Vec<String>,
    /// Whether the test runs by default.
    pub enabled: bool,
}

impl HostTest {
    /// Creates a host test from a command string as written in a build config.
    ///
    /// The first word of `cmd` names a binary under `host_tests/`.
    pub fn new(cmd: &str, enabled: bool) -> Result<Self, shell_words::ParseError> {
        let mut words = shell_words::split(cmd)?.into_iter();
        let argv = match words.next() {
            Some(binary) => std::iter::once(format!("host_tests/{binary}"))
                .chain(words)
                .collect(),
            None => vec!["host_tests/".to_owned()],
        };
        Ok(Self {
            name: format!("host-test:{cmd}"),
            argv,
            enabled,
        })
    }
}

/// A test port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortTest {
    /// The port name.
    pub port: String,
    /// Whether the test runs by default.
    pub enabled: bool,
    /// An optional timeout, in seconds, forwarded to the environment.
    pub timeout: Option<u64>,
    /// The capabilities this test needs.
    pub need: CapabilityFlags,
}

impl PortTest {
    /// Creates a port test with an empty need set.
    pub fn new(port: impl Into<String>, enabled: bool, timeout: Option<u64>) -> Self {
        Self {
            port: port.into(),
            enabled,
            timeout,
            need: CapabilityFlags::empty(),
        }
    }

    /// The command line that boots the environment and runs this port.
    pub fn boot_argv(&self) -> Vec<String> {
        let mut argv = vec![
            "run".to_owned(),
            "--headless".to_owned(),
            "--boot-test".to_owned(),
            self.port.clone(),
        ];
        argv.extend(timeout_args(self.timeout));
        argv
    }

    /// Converts this test into a `boot-test:` device test.
    pub fn to_boot_test(&self) -> DeviceTest {
        DeviceTest {
            name: format!("boot-test:{}", self.port),
            argv: self.boot_argv(),
            enabled: self.enabled,
            need: self.need,
            shell_command: None,
        }
    }

    /// Converts this test into an Android test that starts the port through
    /// [`TEST_CONTROL_BINARY`].
    pub fn to_android_test(&self, cmdargs: &[String], options: &AndroidTestOptions) -> DeviceTest {
        let command = std::iter::once(TEST_CONTROL_BINARY)
            .chain(std::iter::once(self.port.as_str()))
            .chain(cmdargs.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        let options = AndroidTestOptions {
            timeout: self.timeout,
            ..options.clone()
        };
        let mut test = DeviceTest::android(&self.port, command, self.enabled, &options);
        test.need = self.need;
        test
    }
}

/// Options for Android shell-command tests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AndroidTestOptions {
    /// Prepended to the test name.
    pub nameprefix: String,
    /// Extra arguments for the environment's `run` command.
    pub runargs: Vec<String>,
    /// An optional timeout, in seconds.
    pub timeout: Option<u64>,
    /// The Android build to run against, if any.
    pub android: Option<Utf8PathBuf>,
}

/// A command run by the test environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceTest {
    /// The test name.
    pub name: String,
    /// The command line passed to the environment.
    pub argv: Vec<String>,
    /// Whether the test runs by default.
    pub enabled: bool,
    /// The capabilities this test needs.
    pub need: CapabilityFlags,
    /// For Android tests, the shell command run on the device.
    pub shell_command: Option<String>,
}

impl DeviceTest {
    /// Creates an Android test running `command` in a device shell.
    pub fn android(
        name: &str,
        command: impl Into<String>,
        enabled: bool,
        options: &AndroidTestOptions,
    ) -> Self {
        let command = command.into();
        let mut argv = vec![
            "run".to_owned(),
            "--headless".to_owned(),
            "--shell-command".to_owned(),
            command.clone(),
        ];
        argv.extend(timeout_args(options.timeout));
        if let Some(android) = &options.android {
            argv.push("--android".to_owned());
            argv.push(android.to_string());
        }
        argv.extend(options.runargs.iter().cloned());

        Self {
            name: format!("{}android-test:{name}", options.nameprefix),
            argv,
            enabled,
            need: CapabilityFlags::empty(),
            shell_command: Some(command),
        }
    }
}

/// An ordered sequence of tests, run until the first failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositeTest {
    /// The test name.
    pub name: String,
    sequence: Vec<TestDef>,
    /// Whether the test runs by default.
    pub enabled: bool,
    need: CapabilityFlags,
}

impl CompositeTest {
    /// Creates a composite test. The sequence may contain port tests, device tests and reboot
    /// markers.
    pub fn new(
        name: impl Into<String>,
        sequence: Vec<TestDef>,
        enabled: bool,
    ) -> Result<Self, InvalidCompositeStep> {
        if let Some(step) = sequence
            .iter()
            .find(|step| matches!(step, TestDef::Host(_) | TestDef::Composite(_)))
        {
            return Err(InvalidCompositeStep::new(step.kind_name()));
        }
        Ok(Self::from_valid_sequence(name.into(), sequence, enabled))
    }

    // The need set is always the union of the sequence's needs.
    fn from_valid_sequence(name: String, sequence: Vec<TestDef>, enabled: bool) -> Self {
        let need = sequence
            .iter()
            .filter_map(TestDef::need)
            .fold(CapabilityFlags::empty(), CapabilityFlags::union);
        Self {
            name,
            sequence,
            enabled,
            need,
        }
    }

    /// The steps of this test, in order.
    pub fn sequence(&self) -> &[TestDef] {
        &self.sequence
    }

    /// The union of the needs of every step.
    pub fn need(&self) -> CapabilityFlags {
        self.need
    }

    /// Converts every port test in the sequence into a boot test.
    pub fn to_boot_test(&self) -> Self {
        self.map_ports(format!("boot-test:{}", self.name), PortTest::to_boot_test)
    }

    /// Converts every port test in the sequence into an Android test.
    pub fn to_android_test(&self, cmdargs: &[String], options: &AndroidTestOptions) -> Self {
        self.map_ports(
            format!("{}android-test:{}", options.nameprefix, self.name),
            |port| port.to_android_test(cmdargs, options),
        )
    }

    fn map_ports(&self, name: String, convert: impl Fn(&PortTest) -> DeviceTest) -> Self {
        let sequence = self
            .sequence
            .iter()
            .map(|step| match step {
                TestDef::Port(port) => TestDef::Device(convert(port)),
                other => other.clone(),
            })
            .collect();
        Self::from_valid_sequence(name, sequence, self.enabled)
    }
}

fn timeout_args(timeout: Option<u64>) -> Vec<String> {
    match timeout {
        Some(timeout) if timeout > 0 => vec!["--timeout".to_owned(), timeout.to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn port(name: &str, need: CapabilityFlags) -> TestDef {
        let mut test = PortTest::new(name, true, None);
        test.need = need;
        TestDef::Port(test)
    }

    #[test]
    fn host_test_argv() {
        let test = HostTest::new("binder_test --gtest_filter='a b'", true).expect("valid cmd");
        assert_eq!(test.name, "host-test:binder_test --gtest_filter='a b'");
        assert_eq!(
            test.argv,
            vec!["host_tests/binder_test", "--gtest_filter=a b"]
        );
    }

    #[test]
    fn host_tests_never_match() {
        let test = TestDef::Host(HostTest::new("foo", true).unwrap());
        assert!(!test.matches_provide(CapabilityFlags::all()));
        assert!(TestDef::Reboot.matches_provide(CapabilityFlags::empty()));
    }

    #[test]
    fn boot_test_conversion() {
        let test = PortTest::new("com.android.trusty.test", false, Some(30));
        let boot = test.to_boot_test();
        assert_eq!(boot.name, "boot-test:com.android.trusty.test");
        assert_eq!(
            boot.argv,
            vec![
                "run",
                "--headless",
                "--boot-test",
                "com.android.trusty.test",
                "--timeout",
                "30"
            ]
        );
        assert!(!boot.enabled);
    }

    #[test]
    fn android_test_conversion() {
        let mut test = PortTest::new("com.android.ipc-unittest", true, None);
        test.need = CapabilityFlags::ANDROID;
        let options = AndroidTestOptions {
            nameprefix: "android-port-test:".to_owned(),
            runargs: vec!["--boot-arg".to_owned()],
            timeout: None,
            android: Some("/out/android".into()),
        };
        let android = test.to_android_test(&["-v".to_owned()], &options);
        assert_eq!(
            android.name,
            "android-port-test:android-test:com.android.ipc-unittest"
        );
        assert_eq!(
            android.shell_command.as_deref(),
            Some("/vendor/bin/trusty-ut-ctrl com.android.ipc-unittest -v")
        );
        assert_eq!(
            android.argv,
            vec![
                "run",
                "--headless",
                "--shell-command",
                "/vendor/bin/trusty-ut-ctrl com.android.ipc-unittest -v",
                "--android",
                "/out/android",
                "--boot-arg",
            ]
        );
        assert_eq!(android.need, CapabilityFlags::ANDROID);
    }

    #[test]
    fn composite_need_is_union() {
        let composite = CompositeTest::new(
            "storage",
            vec![
                port("a", CapabilityFlags::STORAGE_BOOT),
                TestDef::Reboot,
                port("b", CapabilityFlags::SMP4),
            ],
            true,
        )
        .expect("valid sequence");
        assert_eq!(
            composite.need(),
            CapabilityFlags::STORAGE_BOOT | CapabilityFlags::SMP4
        );

        let boot = composite.to_boot_test();
        assert_eq!(boot.name, "boot-test:storage");
        assert_eq!(boot.need(), composite.need());
        assert!(matches!(boot.sequence()[0], TestDef::Device(_)));
        assert_eq!(boot.sequence()[1], TestDef::Reboot);
    }

    #[test]
    fn composite_rejects_host_tests() {
        let err = CompositeTest::new(
            "bad",
            vec![TestDef::Host(HostTest::new("x", true).unwrap())],
            true,
        )
        .expect_err("host tests are not allowed");
        assert_eq!(
            err.to_string(),
            "composite test sequences cannot contain a host test"
        );
    }

    #[test]
    fn needs_on_port_and_device_tests() {
        let mut test = port("a", CapabilityFlags::empty());
        test.set_needs(&[("android", true), ("smp4", true)])
            .expect("port tests accept needs");
        assert_eq!(
            test.need(),
            Some(CapabilityFlags::ANDROID | CapabilityFlags::SMP4)
        );

        let mut reboot = TestDef::Reboot;
        reboot
            .set_needs(&[("android", true)])
            .expect_err("reboot markers do not accept needs");
    }
}
