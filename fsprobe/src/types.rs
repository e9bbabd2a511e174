//! Filesystem type enum and the case-insensitive string table required by §6.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileSystemType {
    None,
    Ext,
    Ext2,
    Ext3,
    Ext4,
    Btrfs,
    Isofs,
    Xfs,
    Udf,
    ReiserFs,
    ReiserFs3_5,
    ReiserFs3_6,
    ReiserFs4,
    Minix,
    Minix1,
    Minix2,
    Minix3,
    Fat,
    Fat12,
    Fat16,
    Fat32,
    ExFat,
    Afs,
    Coda,
    Nfs,
    Smb1,
    Smb2,
    Unknown,
}

/// `(canonical name, type)`. Order matches the table in §6 of the spec.
const TABLE: &[(&str, FileSystemType)] = &[
    ("none", FileSystemType::None),
    ("EXT", FileSystemType::Ext),
    ("EXT2", FileSystemType::Ext2),
    ("EXT3", FileSystemType::Ext3),
    ("EXT4", FileSystemType::Ext4),
    ("BTRFS", FileSystemType::Btrfs),
    ("ISOFS", FileSystemType::Isofs),
    ("XFS", FileSystemType::Xfs),
    ("UDF", FileSystemType::Udf),
    ("ReiserFS", FileSystemType::ReiserFs),
    ("ReiserFS 3.5", FileSystemType::ReiserFs3_5),
    ("ReiserFS 3.6", FileSystemType::ReiserFs3_6),
    ("ReiserFS 4", FileSystemType::ReiserFs4),
    ("Minix", FileSystemType::Minix),
    ("Minix 1", FileSystemType::Minix1),
    ("Minix 2", FileSystemType::Minix2),
    ("Minix 3", FileSystemType::Minix3),
    ("FAT", FileSystemType::Fat),
    ("FAT12", FileSystemType::Fat12),
    ("FAT16", FileSystemType::Fat16),
    ("FAT32", FileSystemType::Fat32),
    ("EXFAT", FileSystemType::ExFat),
    ("AFS", FileSystemType::Afs),
    ("CODA", FileSystemType::Coda),
    ("NFS", FileSystemType::Nfs),
    ("SMB1", FileSystemType::Smb1),
    ("SMB2", FileSystemType::Smb2),
];

impl FileSystemType {
    pub fn type_to_string(self) -> &'static str {
        TABLE
            .iter()
            .find(|(_, t)| *t == self)
            .map(|(name, _)| *name)
            .unwrap_or("none")
    }

    pub fn parse_type(s: &str) -> Option<FileSystemType> {
        TABLE
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|(_, t)| *t)
    }
}

impl fmt::Display for FileSystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_token_case_insensitively() {
        for (name, ty) in TABLE {
            assert_eq!(FileSystemType::parse_type(name), Some(*ty));
            assert_eq!(FileSystemType::parse_type(&name.to_lowercase()), Some(*ty));
            assert_eq!(FileSystemType::parse_type(&name.to_uppercase()), Some(*ty));
            assert_eq!(ty.type_to_string(), *name);
        }
    }

    #[test]
    fn unknown_token_parses_to_none() {
        assert_eq!(FileSystemType::parse_type("bogus"), None);
    }
}
