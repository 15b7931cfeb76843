//! Read-only discovery of the instance, its boot volume and candidate images.

use crate::console;
use crate::context::ReprovisionContext;
use crate::error::ReprovisionError;
use nimbus_common::{Architecture, AttachmentState, BootVolumeAttachment, Image, Instance, VnicAddress};
use nimbus_providers::CloudProvider;

pub const IMAGE_OPERATING_SYSTEM: &str = "Canonical Ubuntu";
pub const MAX_IMAGE_CHOICES: usize = 10;

/// Fetch the instance and copy its facts into the context.
///
/// Architecture comes from the shape name unless it was forced on the command line.
pub async fn inspect_instance(
    provider: &dyn CloudProvider,
    ctx: &mut ReprovisionContext,
) -> Result<Instance, ReprovisionError> {
    let instance = provider
        .get_instance(&ctx.instance_id)
        .await
        .map_err(ReprovisionError::from_provider)?;

    ctx.instance_name = instance.display_name.clone();
    ctx.shape = instance.shape.clone();
    ctx.availability_domain = instance.availability_domain.clone();
    ctx.lifecycle_state = Some(instance.lifecycle_state);
    if ctx.compartment_id.is_empty() {
        ctx.compartment_id = instance.compartment_id.clone();
    }

    let detected = instance.architecture();
    match ctx.architecture {
        Some(forced) if ctx.arch_forced && forced != detected => {
            console::warn(&format!(
                "Shape {} looks like {} but architecture is forced to {}",
                instance.shape, detected, forced
            ));
        }
        Some(_) if ctx.arch_forced => {}
        _ => ctx.architecture = Some(detected),
    }

    tracing::info!(
        "instance {} ({}) shape={} state={} arch={}",
        instance.display_name,
        instance.id,
        instance.shape,
        instance.lifecycle_state,
        ctx.arch_label()
    );
    Ok(instance)
}

pub async fn list_attachments(
    provider: &dyn CloudProvider,
    ctx: &ReprovisionContext,
) -> anyhow::Result<Vec<BootVolumeAttachment>> {
    provider
        .list_boot_volume_attachments(&ctx.availability_domain, &ctx.compartment_id, &ctx.instance_id)
        .await
}

pub fn attached_count(attachments: &[BootVolumeAttachment]) -> usize {
    attachments
        .iter()
        .filter(|a| a.lifecycle_state == AttachmentState::Attached)
        .count()
}

/// Pick the boot volume reference the run works from.
///
/// An ATTACHED attachment always wins, even over a newer DETACHED one.
/// Without one, the most recently created DETACHED attachment is used and
/// the second value is `true` (an interrupted run left it behind).
pub fn select_boot_volume(
    attachments: &[BootVolumeAttachment],
) -> Result<(&BootVolumeAttachment, bool), ReprovisionError> {
    if let Some(attached) = attachments
        .iter()
        .find(|a| a.lifecycle_state == AttachmentState::Attached)
    {
        return Ok((attached, false));
    }
    attachments
        .iter()
        .filter(|a| a.lifecycle_state == AttachmentState::Detached)
        .max_by_key(|a| a.time_created)
        .map(|a| (a, true))
        .ok_or_else(|| {
            ReprovisionError::Precondition(
                "no attached or detached boot volume found for the instance".to_string(),
            )
        })
}

/// Resolve the boot volume id and size for the context.
pub async fn discover_boot_volume(
    provider: &dyn CloudProvider,
    ctx: &mut ReprovisionContext,
) -> Result<Vec<BootVolumeAttachment>, ReprovisionError> {
    let attachments = list_attachments(provider, ctx)
        .await
        .map_err(ReprovisionError::from_provider)?;

    let (chosen, detached) = select_boot_volume(&attachments)?;
    if detached {
        console::warn(&format!(
            "No boot volume is attached. Using the most recently detached one: {}",
            chosen.boot_volume_id
        ));
    }
    ctx.boot_volume_id = chosen.boot_volume_id.clone();

    match provider.get_boot_volume(&ctx.boot_volume_id).await {
        Ok(volume) => {
            if ctx.boot_volume_size_gb.is_none() {
                ctx.boot_volume_size_gb = Some(volume.size_in_gbs);
            }
            tracing::info!("boot volume {} is {} GB", volume.id, volume.size_in_gbs);
        }
        Err(e) => {
            let err = ReprovisionError::from_provider(e);
            if matches!(err, ReprovisionError::Auth(_)) {
                return Err(err);
            }
            tracing::warn!("could not read boot volume {}: {}", ctx.boot_volume_id, err);
        }
    }
    Ok(attachments)
}

/// Public and private address of the primary VNIC. `None` is not an error.
pub async fn resolve_public_ip(
    provider: &dyn CloudProvider,
    ctx: &mut ReprovisionContext,
) -> Result<Option<String>, ReprovisionError> {
    let address = provider
        .primary_vnic_address(&ctx.compartment_id, &ctx.instance_id)
        .await
        .map_err(ReprovisionError::from_provider)?
        .unwrap_or_default();
    let VnicAddress { public_ip, private_ip } = address;
    ctx.public_ip = public_ip.clone();
    ctx.private_ip = private_ip;
    Ok(public_ip)
}

/// Images for `arch`, newest first, capped at [`MAX_IMAGE_CHOICES`].
pub fn filter_images(images: Vec<Image>, arch: Architecture) -> Vec<Image> {
    let mut matching: Vec<Image> = images
        .into_iter()
        .filter(|i| i.architecture() == arch)
        .collect();
    matching.sort_by(|a, b| b.time_created.cmp(&a.time_created));
    matching.truncate(MAX_IMAGE_CHOICES);
    matching
}

pub async fn list_candidate_images(
    provider: &dyn CloudProvider,
    ctx: &ReprovisionContext,
) -> Result<Vec<Image>, ReprovisionError> {
    let images = provider
        .list_images(&ctx.compartment_id, IMAGE_OPERATING_SYSTEM)
        .await
        .map_err(ReprovisionError::from_provider)?;
    let arch = ctx.architecture.unwrap_or(Architecture::X86);
    Ok(filter_images(images, arch))
}

/// The replacement is observable once exactly one attachment is ATTACHED and
/// it points at a volume other than `old_boot_volume_id`.
pub fn new_attachment<'a>(
    attachments: &'a [BootVolumeAttachment],
    old_boot_volume_id: &str,
) -> Option<&'a BootVolumeAttachment> {
    let mut attached = attachments
        .iter()
        .filter(|a| a.lifecycle_state == AttachmentState::Attached);
    match (attached.next(), attached.next()) {
        (Some(only), None) if only.boot_volume_id != old_boot_volume_id => Some(only),
        _ => None,
    }
}
