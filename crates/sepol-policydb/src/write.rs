//! Binary policy encoder.
//!
//! # File Layout
//!
//! ```text
//! [magic:u32][len:u32][target string]
//! [version:u32][config:u32][sym_num:u32][ocon_num:u32]
//! [policycaps:ebitmap][permissive:ebitmap]
//! 8 × symbol table ([nprim:u32][nel:u32] then entries)
//! [avtab][cond list][role_trans][role_allow][filename_trans]
//! [ocontexts][genfs][range_trans]
//! nprim(types) × [type_attr_map:ebitmap]
//! ```
//!
//! Every integer is little-endian except the raw network-order addresses
//! of node contexts and infiniband subnet prefixes.

use bytes::{BufMut, Bytes, BytesMut};
use sepol_types::{DefaultRange, POLICYDB_CONFIG_MLS, POLICYDB_MAGIC, PolicyVersion, SymbolKind, TargetPlatform};
use tracing::{debug, warn};

use crate::avtab::AvTab;
use crate::ebitmap::Ebitmap;
use crate::policydb::{Context, MlsLevel, MlsRange, PermDatum, PolicyDb};
use crate::symtab::SymTab;
use crate::{PolicyDbError, Result};

/// Serializes a [`PolicyDb`] in kernel format.
pub struct PolicyWriter<'a> {
    policy: &'a PolicyDb,
    version: PolicyVersion,
    buf: BytesMut,
}

impl PolicyDb {
    /// Encodes the policy at its configured version.
    pub fn to_bytes(&self) -> Result<Bytes> {
        PolicyWriter::new(self).write()
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
}

fn str_len(s: &str) -> u32 {
    s.len() as u32
}

impl<'a> PolicyWriter<'a> {
    pub fn new(policy: &'a PolicyDb) -> Self {
        Self {
            policy,
            version: policy.version,
            buf: BytesMut::with_capacity(64 * 1024),
        }
    }

    pub fn write(mut self) -> Result<Bytes> {
        if !self.version.is_writable() {
            return Err(PolicyDbError::UnsupportedVersion {
                version: self.version.as_u32(),
                reason: format!(
                    "writable versions are {} to {}",
                    PolicyVersion::MIN_WRITABLE,
                    PolicyVersion::MAX
                ),
            });
        }

        self.write_header();
        self.policy.policycaps.write(&mut self.buf);
        if self.version.supports_permissive() {
            self.policy.permissive_map.write(&mut self.buf);
        }
        for kind in SymbolKind::ALL {
            self.write_symtab(kind)?;
        }
        self.policy.te_avtab.write(self.version, &mut self.buf)?;
        self.write_cond_list()?;
        self.write_role_trans();
        self.write_role_allow();
        if self.version.supports_filename_trans() {
            self.write_filename_trans();
        }
        self.write_ocontexts()?;
        self.write_genfs();
        self.write_range_trans();
        for types in &self.policy.type_attr_map {
            types.write(&mut self.buf);
        }

        debug!(
            bytes = self.buf.len(),
            version = self.version.as_u32(),
            "encoded policy"
        );
        Ok(self.buf.freeze())
    }

    // ------------------------------------------------------------------------
    // Header
    // ------------------------------------------------------------------------

    fn write_header(&mut self) {
        let policy = self.policy;
        let target = policy.target.target_string();
        self.buf.put_u32_le(POLICYDB_MAGIC);
        self.buf.put_u32_le(str_len(target));
        put_str(&mut self.buf, target);

        let mut config = policy.handle_unknown.config_bits();
        if policy.mls {
            config |= POLICYDB_CONFIG_MLS;
        }
        self.buf.put_u32_le(self.version.as_u32());
        self.buf.put_u32_le(config);
        self.buf.put_u32_le(SymbolKind::COUNT as u32);
        self.buf.put_u32_le(self.version.ocon_count(policy.target));
    }

    // ------------------------------------------------------------------------
    // Shared pieces
    // ------------------------------------------------------------------------

    fn write_level(buf: &mut BytesMut, level: &MlsLevel) {
        buf.put_u32_le(level.sens);
        level.cats.write(buf);
    }

    fn write_range(buf: &mut BytesMut, range: &MlsRange) {
        let single = range.low == range.high;
        buf.put_u32_le(if single { 1 } else { 2 });
        buf.put_u32_le(range.low.sens);
        if !single {
            buf.put_u32_le(range.high.sens);
        }
        range.low.cats.write(buf);
        if !single {
            range.high.cats.write(buf);
        }
    }

    /// Every writable version carries the range, MLS or not.
    fn write_context(buf: &mut BytesMut, context: &Context) {
        buf.put_u32_le(context.user);
        buf.put_u32_le(context.role);
        buf.put_u32_le(context.type_);
        Self::write_range(buf, &context.range);
    }

    fn write_perms(buf: &mut BytesMut, perms: &SymTab<PermDatum>) {
        for (name, perm) in perms.iter() {
            buf.put_u32_le(str_len(name));
            buf.put_u32_le(perm.value);
            put_str(buf, name);
        }
    }

    // ------------------------------------------------------------------------
    // Symbol tables
    // ------------------------------------------------------------------------

    fn write_symtab(&mut self, kind: SymbolKind) -> Result<()> {
        let policy = self.policy;
        let (nprim, nel) = policy.symtab_counts(kind);
        self.buf.put_u32_le(nprim);
        self.buf.put_u32_le(nel);
        let buf = &mut self.buf;
        let version = self.version;

        match kind {
            SymbolKind::Commons => {
                for (name, common) in policy.commons.iter() {
                    buf.put_u32_le(str_len(name));
                    buf.put_u32_le(common.value);
                    buf.put_u32_le(common.perms.nprim());
                    buf.put_u32_le(common.perms.nel());
                    put_str(buf, name);
                    Self::write_perms(buf, &common.perms);
                }
            }
            SymbolKind::Classes => {
                for (name, class) in policy.classes.iter() {
                    let comkey = class.comkey.as_deref().unwrap_or("");
                    buf.put_u32_le(str_len(name));
                    buf.put_u32_le(str_len(comkey));
                    buf.put_u32_le(class.value);
                    buf.put_u32_le(class.nprim);
                    buf.put_u32_le(class.perms.nel());
                    // no constraints
                    buf.put_u32_le(0);
                    put_str(buf, name);
                    put_str(buf, comkey);
                    Self::write_perms(buf, &class.perms);
                    // no validatetrans
                    buf.put_u32_le(0);

                    if version.supports_object_defaults() {
                        let mut range = class.default_range.map_or(0, DefaultRange::number);
                        if class.default_range == Some(DefaultRange::Glblub) && !version.supports_glblub() {
                            warn!(
                                class = %name,
                                version = version.as_u32(),
                                "glblub default range needs a newer policy version, dropping it"
                            );
                            range = 0;
                        }
                        buf.put_u32_le(class.default_user.map_or(0, |d| d.number()));
                        buf.put_u32_le(class.default_role.map_or(0, |d| d.number()));
                        buf.put_u32_le(range);
                    }
                    if version.supports_default_type() {
                        buf.put_u32_le(class.default_type.map_or(0, |d| d.number()));
                    }
                }
            }
            SymbolKind::Roles => {
                for (name, role) in policy.roles.iter() {
                    buf.put_u32_le(str_len(name));
                    buf.put_u32_le(role.value);
                    buf.put_u32_le(role.bounds);
                    put_str(buf, name);
                    role.dominates.write(buf);
                    if role.value == OBJECT_R_VAL {
                        Ebitmap::new().write(buf);
                    } else {
                        role.types.write(buf);
                    }
                }
            }
            SymbolKind::Types => {
                for (name, ty) in policy.types.iter() {
                    buf.put_u32_le(str_len(name));
                    buf.put_u32_le(ty.value);
                    buf.put_u32_le(ty.properties());
                    buf.put_u32_le(ty.bounds);
                    put_str(buf, name);
                }
            }
            SymbolKind::Users => {
                for (name, user) in policy.users.iter() {
                    buf.put_u32_le(str_len(name));
                    buf.put_u32_le(user.value);
                    buf.put_u32_le(user.bounds);
                    put_str(buf, name);
                    user.roles.write(buf);
                    Self::write_range(buf, &user.range);
                    Self::write_level(buf, &user.dfltlevel);
                }
            }
            SymbolKind::Bools => {
                for (name, boolean) in policy.bools.iter() {
                    buf.put_u32_le(boolean.value);
                    buf.put_u32_le(u32::from(boolean.state));
                    buf.put_u32_le(str_len(name));
                    put_str(buf, name);
                }
            }
            SymbolKind::Levels => {
                for (name, level) in policy.levels.iter() {
                    buf.put_u32_le(str_len(name));
                    buf.put_u32_le(u32::from(level.isalias));
                    put_str(buf, name);
                    Self::write_level(buf, &level.level);
                }
            }
            SymbolKind::Cats => {
                for (name, cat) in policy.cats.iter() {
                    buf.put_u32_le(str_len(name));
                    buf.put_u32_le(cat.value);
                    buf.put_u32_le(u32::from(cat.isalias));
                    put_str(buf, name);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------------

    fn write_cond_list(&mut self) -> Result<()> {
        let policy = self.policy;
        self.buf.put_u32_le(policy.cond_list.len() as u32);
        for node in &policy.cond_list {
            self.buf.put_u32_le(u32::from(node.cur_state));
            self.buf.put_u32_le(node.expr.len() as u32);
            for expr in &node.expr {
                let (expr_type, boolean) = expr.encode();
                self.buf.put_u32_le(expr_type);
                self.buf.put_u32_le(boolean);
            }
            for list in [&node.true_list, &node.false_list] {
                self.buf.put_u32_le(list.len() as u32);
                for item in list {
                    let table = &policy.te_cond_avtab;
                    AvTab::write_item(table.key(*item), table.datum(*item), self.version, &mut self.buf)?;
                }
            }
        }
        Ok(())
    }

    fn write_role_trans(&mut self) {
        let with_class = self.version.supports_roletrans_class();
        self.buf.put_u32_le(self.policy.role_trans.len() as u32);
        for rt in &self.policy.role_trans {
            self.buf.put_u32_le(rt.role);
            self.buf.put_u32_le(rt.type_);
            self.buf.put_u32_le(rt.new_role);
            if with_class {
                self.buf.put_u32_le(rt.tclass);
            }
        }
    }

    fn write_role_allow(&mut self) {
        self.buf.put_u32_le(self.policy.role_allow.len() as u32);
        for ra in &self.policy.role_allow {
            self.buf.put_u32_le(ra.role);
            self.buf.put_u32_le(ra.new_role);
        }
    }

    fn write_filename_trans(&mut self) {
        let trans = &self.policy.filename_trans;
        if self.version.supports_compact_filename_trans() {
            self.buf.put_u32_le(trans.nkeys());
            for (key, datums) in trans.iter() {
                self.buf.put_u32_le(str_len(&key.name));
                put_str(&mut self.buf, &key.name);
                self.buf.put_u32_le(key.ttype);
                self.buf.put_u32_le(key.tclass);
                self.buf.put_u32_le(datums.len() as u32);
                for datum in datums {
                    datum.stypes.write(&mut self.buf);
                    self.buf.put_u32_le(datum.otype);
                }
            }
        } else {
            self.buf.put_u32_le(trans.nrules());
            for (key, datums) in trans.iter() {
                for datum in datums {
                    for bit in datum.stypes.iter() {
                        self.buf.put_u32_le(str_len(&key.name));
                        put_str(&mut self.buf, &key.name);
                        self.buf.put_u32_le(bit + 1);
                        self.buf.put_u32_le(key.ttype);
                        self.buf.put_u32_le(key.tclass);
                        self.buf.put_u32_le(datum.otype);
                    }
                }
            }
        }
    }

    fn write_range_trans(&mut self) {
        let with_class = self.version.supports_rangetrans_class();
        self.buf.put_u32_le(self.policy.range_trans.len() as u32);
        for rt in &self.policy.range_trans {
            self.buf.put_u32_le(rt.source_type);
            self.buf.put_u32_le(rt.target_type);
            if with_class {
                self.buf.put_u32_le(rt.target_class);
            }
            Self::write_range(&mut self.buf, &rt.range);
        }
    }

    // ------------------------------------------------------------------------
    // Object contexts
    // ------------------------------------------------------------------------

    fn write_ocontexts(&mut self) -> Result<()> {
        match self.policy.target {
            TargetPlatform::SELinux => {
                self.write_selinux_ocontexts();
                Ok(())
            }
            TargetPlatform::Xen => self.write_xen_ocontexts(),
        }
    }

    fn write_isids(&mut self) {
        let buf = &mut self.buf;
        buf.put_u32_le(self.policy.ocontexts.isids.len() as u32);
        for isid in &self.policy.ocontexts.isids {
            buf.put_u32_le(isid.sid);
            Self::write_context(buf, &isid.context);
        }
    }

    fn write_selinux_ocontexts(&mut self) {
        let policy = self.policy;
        let ocons = &policy.ocontexts;
        let infiniband = self.version.ocon_count(TargetPlatform::SELinux) > sepol_types::OCON_IBPKEY;
        self.write_isids();
        let buf = &mut self.buf;

        buf.put_u32_le(ocons.fs.len() as u32);
        for fs in &ocons.fs {
            buf.put_u32_le(str_len(&fs.name));
            put_str(buf, &fs.name);
            Self::write_context(buf, &fs.fs_context);
            Self::write_context(buf, &fs.file_context);
        }

        buf.put_u32_le(ocons.ports.len() as u32);
        for port in &ocons.ports {
            buf.put_u32_le(port.protocol.number());
            buf.put_u32_le(port.low);
            buf.put_u32_le(port.high);
            Self::write_context(buf, &port.context);
        }

        buf.put_u32_le(ocons.netifs.len() as u32);
        for netif in &ocons.netifs {
            buf.put_u32_le(str_len(&netif.name));
            put_str(buf, &netif.name);
            Self::write_context(buf, &netif.if_context);
            Self::write_context(buf, &netif.packet_context);
        }

        buf.put_u32_le(ocons.nodes.len() as u32);
        for node in &ocons.nodes {
            buf.put_slice(&node.addr);
            buf.put_slice(&node.mask);
            Self::write_context(buf, &node.context);
        }

        buf.put_u32_le(ocons.fsuses.len() as u32);
        for fsuse in &ocons.fsuses {
            buf.put_u32_le(fsuse.behavior.number());
            buf.put_u32_le(str_len(&fsuse.fs_name));
            put_str(buf, &fsuse.fs_name);
            Self::write_context(buf, &fsuse.context);
        }

        buf.put_u32_le(ocons.node6s.len() as u32);
        for node in &ocons.node6s {
            buf.put_slice(&node.addr);
            buf.put_slice(&node.mask);
            Self::write_context(buf, &node.context);
        }

        if infiniband {
            buf.put_u32_le(ocons.ibpkeys.len() as u32);
            for pkey in &ocons.ibpkeys {
                buf.put_slice(&pkey.subnet_prefix);
                buf.put_u32_le(pkey.low);
                buf.put_u32_le(pkey.high);
                Self::write_context(buf, &pkey.context);
            }

            buf.put_u32_le(ocons.ibendports.len() as u32);
            for endport in &ocons.ibendports {
                buf.put_u32_le(str_len(&endport.dev_name));
                buf.put_u32_le(endport.port);
                put_str(buf, &endport.dev_name);
                Self::write_context(buf, &endport.context);
            }
        } else if !ocons.ibpkeys.is_empty() || !ocons.ibendports.is_empty() {
            warn!(
                version = self.version.as_u32(),
                "infiniband contexts need a newer policy version, dropping them"
            );
        }
    }

    fn write_xen_ocontexts(&mut self) -> Result<()> {
        let policy = self.policy;
        let ocons = &policy.ocontexts;
        let version = self.version;
        self.write_isids();
        let buf = &mut self.buf;

        buf.put_u32_le(ocons.pirqs.len() as u32);
        for pirq in &ocons.pirqs {
            buf.put_u32_le(pirq.pirq);
            Self::write_context(buf, &pirq.context);
        }

        buf.put_u32_le(ocons.ioports.len() as u32);
        for ioport in &ocons.ioports {
            buf.put_u32_le(ioport.low);
            buf.put_u32_le(ioport.high);
            Self::write_context(buf, &ioport.context);
        }

        buf.put_u32_le(ocons.iomems.len() as u32);
        for iomem in &ocons.iomems {
            if version.as_u32() >= PolicyVersion::XEN_DEVICETREE {
                buf.put_u64_le(iomem.low);
                buf.put_u64_le(iomem.high);
            } else {
                let narrow = |addr: u64| {
                    u32::try_from(addr).map_err(|_| PolicyDbError::UnsupportedVersion {
                        version: version.as_u32(),
                        reason: format!("iomem address {addr:#x} needs a 64-bit capable version"),
                    })
                };
                buf.put_u32_le(narrow(iomem.low)?);
                buf.put_u32_le(narrow(iomem.high)?);
            }
            Self::write_context(buf, &iomem.context);
        }

        buf.put_u32_le(ocons.pcidevices.len() as u32);
        for dev in &ocons.pcidevices {
            buf.put_u32_le(dev.device);
            Self::write_context(buf, &dev.context);
        }

        if version.as_u32() >= PolicyVersion::XEN_DEVICETREE {
            buf.put_u32_le(ocons.devicetrees.len() as u32);
            for dt in &ocons.devicetrees {
                buf.put_u32_le(str_len(&dt.path));
                put_str(buf, &dt.path);
                Self::write_context(buf, &dt.context);
            }
        }
        Ok(())
    }

    fn write_genfs(&mut self) {
        let buf = &mut self.buf;
        buf.put_u32_le(self.policy.genfs.len() as u32);
        for genfs in &self.policy.genfs {
            buf.put_u32_le(str_len(&genfs.fstype));
            put_str(buf, &genfs.fstype);
            buf.put_u32_le(genfs.entries.len() as u32);
            for entry in &genfs.entries {
                buf.put_u32_le(str_len(&entry.path));
                put_str(buf, &entry.path);
                buf.put_u32_le(entry.sclass);
                Self::write_context(buf, &entry.context);
            }
        }
    }
}

/// Value of the built-in `object_r` role.
pub const OBJECT_R_VAL: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::PolicyHeader;
    use crate::policydb::{InitialSid, RoleDatum, TypeDatum, TypeFlavor, UserDatum};
    use crate::reader::PolicyReader;
    use sepol_types::HandleUnknown;

    fn minimal(version: u32) -> PolicyDb {
        let mut db = PolicyDb::new(TargetPlatform::SELinux, PolicyVersion::new(version));
        let value = db.roles.next_value();
        db.roles
            .insert("object_r", RoleDatum { value, ..RoleDatum::default() })
            .unwrap();
        let value = db.types.next_value();
        db.types
            .insert(
                "t",
                TypeDatum {
                    value,
                    flavor: TypeFlavor::Type,
                    bounds: 0,
                },
            )
            .unwrap();
        db.type_attr_map.push(Ebitmap::new());
        db
    }

    #[test]
    fn header_carries_version_and_config() {
        let mut db = minimal(31);
        db.mls = true;
        db.handle_unknown = HandleUnknown::Allow;
        let bytes = db.to_bytes().unwrap();
        let header = PolicyHeader::read(&bytes).unwrap();
        assert_eq!(header.version, 31);
        assert!(header.mls());
        assert_eq!(header.handle_unknown(), HandleUnknown::Allow);
        assert_eq!(header.sym_num, 8);
        assert_eq!(header.ocon_num, 9);
    }

    fn ranged_level() -> MlsLevel {
        MlsLevel {
            sens: 1,
            cats: [0u32, 1].into_iter().collect(),
        }
    }

    fn with_user_and_sid(mut db: PolicyDb) -> PolicyDb {
        let value = db.users.next_value();
        let mut roles = Ebitmap::new();
        roles.set_bit(0, true);
        db.users
            .insert(
                "u",
                UserDatum {
                    value,
                    bounds: 0,
                    roles,
                    range: MlsRange {
                        low: MlsLevel::default(),
                        high: ranged_level(),
                    },
                    dfltlevel: MlsLevel::default(),
                },
            )
            .unwrap();
        db.ocontexts.isids.push(InitialSid {
            sid: 1,
            name: "kernel".to_string(),
            context: Context {
                user: 1,
                role: 1,
                type_: 1,
                range: MlsRange::single(ranged_level()),
            },
        });
        db
    }

    #[test]
    fn mls_flag_only_changes_the_config_word() {
        let mut db = with_user_and_sid(minimal(33));
        let plain = db.to_bytes().unwrap();
        db.mls = true;
        let mls = db.to_bytes().unwrap();

        assert_eq!(plain.len(), mls.len());
        let config = 12 + TargetPlatform::SELinux.target_string().len();
        let differing: Vec<usize> = (0..plain.len()).filter(|&i| plain[i] != mls[i]).collect();
        assert!(!differing.is_empty());
        assert!(differing.iter().all(|i| (config..config + 4).contains(i)), "{differing:?}");
    }

    #[test]
    fn non_mls_user_record_keeps_range_and_default_level() {
        let base = minimal(33).to_bytes().unwrap();
        let db = with_user_and_sid(minimal(33));
        let encoded = db.to_bytes().unwrap();

        let user = db.users.search("u").unwrap();
        let mut tail = BytesMut::new();
        user.roles.write(&mut tail);
        PolicyWriter::write_range(&mut tail, &user.range);
        PolicyWriter::write_level(&mut tail, &user.dfltlevel);
        let user_record = 12 + "u".len() + tail.len();

        let mut context = BytesMut::new();
        PolicyWriter::write_context(&mut context, &db.ocontexts.isids[0].context);
        let sid_record = 4 + context.len();

        assert_eq!(encoded.len(), base.len() + user_record + sid_record);
    }

    #[test]
    fn context_always_carries_its_range() {
        let context = Context {
            user: 1,
            role: 2,
            type_: 3,
            range: MlsRange {
                low: MlsLevel::default(),
                high: ranged_level(),
            },
        };
        let mut buf = BytesMut::new();
        PolicyWriter::write_context(&mut buf, &context);

        let mut reader = PolicyReader::new(&buf);
        assert_eq!(reader.read_u32().unwrap(), 1);
        assert_eq!(reader.read_u32().unwrap(), 2);
        assert_eq!(reader.read_u32().unwrap(), 3);
        assert_eq!(reader.read_u32().unwrap(), 2);
        assert_eq!(reader.read_u32().unwrap(), 0);
        assert_eq!(reader.read_u32().unwrap(), 1);
        assert!(Ebitmap::read(&mut reader).unwrap().is_empty());
        let high: Vec<u32> = Ebitmap::read(&mut reader).unwrap().iter().collect();
        assert_eq!(high, vec![0, 1]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn old_versions_are_rejected() {
        let db = minimal(23);
        assert!(matches!(
            db.to_bytes(),
            Err(PolicyDbError::UnsupportedVersion { version: 23, .. })
        ));
    }

    #[test]
    fn single_level_range_writes_one_level() {
        let mut buf = BytesMut::new();
        PolicyWriter::write_range(&mut buf, &MlsRange::single(MlsLevel { sens: 1, cats: Ebitmap::new() }));
        let mut reader = PolicyReader::new(&buf);
        assert_eq!(reader.read_u32().unwrap(), 1);
        assert_eq!(reader.read_u32().unwrap(), 1);
        Ebitmap::read(&mut reader).unwrap();
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn large_iomem_needs_version_30_on_xen() {
        let mut db = minimal(29);
        db.target = TargetPlatform::Xen;
        db.ocontexts.iomems.push(crate::policydb::IoMemCon {
            low: 0x1_0000_0000,
            high: 0x1_0000_0fff,
            context: Context::default(),
        });
        assert!(db.to_bytes().is_err());
        db.version = PolicyVersion::new(30);
        assert!(db.to_bytes().is_ok());
    }
}
