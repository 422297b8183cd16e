//! Cloud-config for a director whose VMs are sibling containers.
//!
//! One AZ, one manual network covering the director subnet. The gateway
//! and every address up to the director's own are reserved so deployments
//! never collide with it.

use crate::constants::DIRECTOR_HOST_INDEX;
use crate::error::{Error, Result};
use crate::net::Ipv4Subnet;
use serde::Serialize;
use std::collections::BTreeMap;

const AZ: &str = "z1";
const DEFAULT_NAME: &str = "default";
const DEFAULT_DISK_SIZE_MB: u32 = 10_240;
const COMPILATION_WORKERS: u32 = 4;

type CloudProperties = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloudConfig {
    pub azs: Vec<Az>,
    pub vm_types: Vec<VmType>,
    pub disk_types: Vec<DiskType>,
    pub networks: Vec<Network>,
    pub compilation: Compilation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Az {
    pub name: String,
    pub cloud_properties: CloudProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmType {
    pub name: String,
    pub cloud_properties: CloudProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskType {
    pub name: String,
    pub disk_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Network {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub subnets: Vec<Subnet>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subnet {
    pub range: String,
    pub gateway: String,
    pub azs: Vec<String>,
    pub reserved: Vec<String>,
    pub dns: Vec<String>,
    pub cloud_properties: CloudProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Compilation {
    pub workers: u32,
    pub az: String,
    pub reuse_compilation_vms: bool,
    pub vm_type: String,
    pub network: String,
}

impl CloudConfig {
    /// Builds the cloud-config for `subnet`, with the runtime network named
    /// `network_name` in the subnet's cloud properties.
    pub fn for_network(subnet: &Ipv4Subnet, network_name: &str) -> Result<Self> {
        let first_reserved = subnet.nth_host(1);
        let director = subnet.nth_host(DIRECTOR_HOST_INDEX);
        let (Some(first_reserved), Some(director)) = (first_reserved, director) else {
            return Err(Error::Config(format!(
                "subnet {} is too small for a director at host #{}",
                subnet, DIRECTOR_HOST_INDEX
            )));
        };

        let mut network_properties = CloudProperties::new();
        network_properties.insert("name".to_string(), network_name.to_string());

        Ok(Self {
            azs: vec![Az {
                name: AZ.to_string(),
                cloud_properties: CloudProperties::new(),
            }],
            vm_types: vec![VmType {
                name: DEFAULT_NAME.to_string(),
                cloud_properties: CloudProperties::new(),
            }],
            disk_types: vec![DiskType {
                name: DEFAULT_NAME.to_string(),
                disk_size: DEFAULT_DISK_SIZE_MB,
            }],
            networks: vec![Network {
                name: DEFAULT_NAME.to_string(),
                kind: "manual".to_string(),
                subnets: vec![Subnet {
                    range: subnet.to_string(),
                    gateway: subnet.gateway().to_string(),
                    azs: vec![AZ.to_string()],
                    reserved: vec![format!("{} - {}", first_reserved, director)],
                    dns: vec![subnet.gateway().to_string()],
                    cloud_properties: network_properties,
                }],
            }],
            compilation: Compilation {
                workers: COMPILATION_WORKERS,
                az: AZ.to_string(),
                reuse_compilation_vms: true,
                vm_type: DEFAULT_NAME.to_string(),
                network: DEFAULT_NAME.to_string(),
            },
        })
    }

    pub fn to_yaml_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(self)?.into_bytes())
    }
}
