use std::fmt;

use crate::error::ParseError;

const OPERATION_PREFIX: &str = "luks";

/// The cryptsetup actions that run through the device key pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeOperationKind {
    Open,
    Format,
    Resume,
    AddKey,
    ChangeKey,
}

impl VolumeOperationKind {
    pub const ALL: [VolumeOperationKind; 5] = [
        VolumeOperationKind::Open,
        VolumeOperationKind::Format,
        VolumeOperationKind::Resume,
        VolumeOperationKind::AddKey,
        VolumeOperationKind::ChangeKey,
    ];

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.keyword() == keyword)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            VolumeOperationKind::Open => "luksOpen",
            VolumeOperationKind::Format => "luksFormat",
            VolumeOperationKind::Resume => "luksResume",
            VolumeOperationKind::AddKey => "luksAddKey",
            VolumeOperationKind::ChangeKey => "luksChangeKey",
        }
    }
}

impl fmt::Display for VolumeOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One pipeline run: the action, the cryptsetup arguments as the operator
/// typed them, and the LUKS device they name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeOperation {
    pub kind: VolumeOperationKind,
    pub args: Vec<String>,
    pub device_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Volume(VolumeOperation),
    /// A `luks*` action we have no business with, handed to cryptsetup as is.
    Passthrough(Vec<String>),
}

/// cryptsetup options whose value is the next argument. Their values are
/// never the action keyword or the device, even when they look like one
/// (`--type luks1`).
const OPTIONS_WITH_VALUE: &[&str] = &[
    "--type", "-M", "--cipher", "-c", "--hash", "--key-size", "-s", "--key-file", "-d",
    "--keyfile-size", "-l", "--keyfile-offset", "--new-keyfile-size", "--new-keyfile-offset",
    "--key-slot", "-S", "--iter-time", "-i", "--pbkdf", "--pbkdf-memory", "--pbkdf-parallel",
    "--pbkdf-force-iterations", "--tries", "-T", "--timeout", "-t", "--header", "--offset",
    "-o", "--skip", "-p", "--align-payload", "--uuid", "--label", "--subsystem",
    "--sector-size", "--master-key-file", "--volume-key-file", "--use-urandom-size",
];

/// Indices of the arguments that are neither options nor option values.
fn operands(args: &[String]) -> impl Iterator<Item = usize> + '_ {
    let mut value_pending = false;
    args.iter().enumerate().filter_map(move |(index, arg)| {
        if std::mem::take(&mut value_pending) {
            return None;
        }
        if arg.starts_with('-') {
            value_pending = OPTIONS_WITH_VALUE.contains(&arg.as_str());
            return None;
        }
        Some(index)
    })
}

impl Invocation {
    /// Classify a cryptsetup argument list by its first `luks*` operand.
    pub fn parse(args: Vec<String>) -> Result<Self, ParseError> {
        let mut positions = operands(&args);
        let position = positions
            .find(|&index| args[index].starts_with(OPERATION_PREFIX))
            .ok_or(ParseError::NoOperation)?;

        let Some(kind) = VolumeOperationKind::from_keyword(&args[position]) else {
            drop(positions);
            return Ok(Invocation::Passthrough(args));
        };

        let device_path = positions
            .next()
            .map(|index| args[index].clone())
            .ok_or(ParseError::DevicePathMissing {
                keyword: kind.keyword(),
            })?;
        drop(positions);

        Ok(Invocation::Volume(VolumeOperation {
            kind,
            args,
            device_path,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn keywords_round_trip() {
        for kind in VolumeOperationKind::ALL {
            assert_eq!(VolumeOperationKind::from_keyword(kind.keyword()), Some(kind));
        }
        assert_eq!(VolumeOperationKind::from_keyword("luksopen"), None);
    }

    #[test]
    fn device_path_follows_the_keyword() {
        let invocation = Invocation::parse(argv("luksOpen /dev/sda2 cryptroot")).expect("parse");
        let Invocation::Volume(op) = invocation else {
            panic!("expected a volume operation");
        };
        assert_eq!(op.kind, VolumeOperationKind::Open);
        assert_eq!(op.device_path, "/dev/sda2");
        assert_eq!(op.args, argv("luksOpen /dev/sda2 cryptroot"));
    }

    #[test]
    fn flags_are_skipped_when_finding_the_device() {
        let invocation =
            Invocation::parse(argv("-v luksFormat --batch-mode -q /dev/sdb1")).expect("parse");
        let Invocation::Volume(op) = invocation else {
            panic!("expected a volume operation");
        };
        assert_eq!(op.kind, VolumeOperationKind::Format);
        assert_eq!(op.device_path, "/dev/sdb1");
        assert_eq!(op.args[0], "-v");
    }

    #[test]
    fn option_values_are_neither_keyword_nor_device() {
        for line in [
            "--type luks1 luksFormat /dev/sdb",
            "luksFormat --type luks1 /dev/sdb",
            "luksFormat -c aes-xts-plain64 --key-size 512 /dev/sdb",
        ] {
            let Invocation::Volume(op) = Invocation::parse(argv(line)).expect("parse") else {
                panic!("expected a volume operation for {line:?}");
            };
            assert_eq!(op.kind, VolumeOperationKind::Format, "{line}");
            assert_eq!(op.device_path, "/dev/sdb", "{line}");
            assert_eq!(op.args, argv(line));
        }
    }

    #[test]
    fn inline_option_values_need_no_skipping() {
        let Invocation::Volume(op) =
            Invocation::parse(argv("luksFormat --type=luks1 /dev/sdb")).expect("parse")
        else {
            panic!("expected a volume operation");
        };
        assert_eq!(op.device_path, "/dev/sdb");
    }

    #[test]
    fn missing_device_is_an_error() {
        let err = Invocation::parse(argv("luksResume --tries 3")).unwrap_err();
        assert!(matches!(
            err,
            ParseError::DevicePathMissing {
                keyword: "luksResume"
            }
        ));
    }

    #[test]
    fn unknown_luks_actions_pass_through() {
        let args = argv("luksDump /dev/sdc");
        assert_eq!(
            Invocation::parse(args.clone()).expect("parse"),
            Invocation::Passthrough(args)
        );

        let args = argv("luksUUID /dev/sdc");
        assert!(matches!(
            Invocation::parse(args).expect("parse"),
            Invocation::Passthrough(_)
        ));
    }

    #[test]
    fn no_operation_is_an_error() {
        assert!(matches!(
            Invocation::parse(argv("open /dev/sdc data")),
            Err(ParseError::NoOperation)
        ));
        assert!(matches!(Invocation::parse(Vec::new()), Err(ParseError::NoOperation)));
    }
}
