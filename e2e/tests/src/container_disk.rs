// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use e2e_testcase::e2e_framework::console::{ConsoleScript, Pattern};
use e2e_testcase::e2e_framework::guest_os::GuestOsKind;
use e2e_testcase::e2e_framework::vmi_api_types::Bus;
use e2e_testcase::e2e_framework::vmi_factory::{
    add_ephemeral_cdrom, set_container_disk_path, ContainerDisk,
};
use e2e_testcase::*;
use tracing::info;

const HELLO_USER_DATA: &str = "#!/bin/bash\necho 'hello'\n";

#[e2e_testcase]
async fn start_and_stop_same_vmi_test(ctx: &Framework) {
    let vmi = ctx.new_random_vmi_with_ephemeral_disk_and_userdata(
        ContainerDisk::Cirros,
        HELLO_USER_DATA,
    );

    let records = ctx.restart_cycles(&vmi, 2).await?;
    assert_eq!(records.len(), 2);
}

#[e2e_testcase]
async fn spec_unchanged_on_status_update_test(ctx: &Framework) {
    let vmi = ctx.new_random_vmi_with_ephemeral_disk_and_userdata(
        ContainerDisk::Cirros,
        HELLO_USER_DATA,
    );

    let record = ctx.launch(&vmi).await?;
    ctx.wait_for_successful_vmi_start(&record).await?;
    ctx.verify_spec_unchanged(&record)
        .await
        .context("started VMI's spec differs from the created one")?;
}

#[e2e_testcase]
async fn multiple_vmis_test(ctx: &Framework) {
    let vmis: Vec<_> = (0..5)
        .map(|_| {
            let mut vmi = ctx.new_random_vmi_with_ephemeral_disk_and_userdata(
                ContainerDisk::Cirros,
                HELLO_USER_DATA,
            );
            // Enough to schedule without letting every guest fully boot.
            vmi.spec.set_memory("1M");
            vmi
        })
        .collect();

    let records = ctx.launch_many(&vmis).await?;

    // VMIs started in parallel may race each other for host network devices
    // and emit warnings before they eventually start.
    let results = ctx.verify_all_container_disk_vmis(&records, true).await;
    for (record, result) in records.iter().zip(results) {
        let disks = result
            .with_context(|| format!("verifying VMI {}", record.name()))?;
        info!(vmi = record.name(), ?disks, "container disk verified");
    }
}

#[e2e_testcase]
async fn custom_disk_path_test(ctx: &Framework) {
    let mut vmi = ctx.new_random_vmi_with_ephemeral_disk_and_userdata(
        ContainerDisk::Cirros,
        HELLO_USER_DATA,
    );
    set_container_disk_path(&mut vmi, "/custom-disk/boot.img");

    let record = ctx.launch(&vmi).await?;
    ctx.wait_for_successful_vmi_start(&record).await?;
}

#[e2e_testcase]
async fn virtio_win_sata_cdrom_test(ctx: &Framework) {
    let mut vmi = ctx.new_random_vmi_with_ephemeral_disk(ContainerDisk::Alpine);
    let virtio = ctx.container_disk(ContainerDisk::Virtio);
    add_ephemeral_cdrom(&mut vmi, "disk4", Bus::Sata, &virtio);

    let record = ctx.launch(&vmi).await?;
    ctx.wait_for_successful_vmi_start(&record).await?;

    let exit_ok = Pattern::regex(r"(?m)^0\r?$")?;
    let script = ConsoleScript::new(ctx.params().console_timeout)
        .send("mount -t iso9600 /dev/cdrom")
        .send_expect("echo $?", exit_ok.clone())
        .send("cd /media/cdrom")
        .send("ls virtio-win_license.txt guest-agent")
        .send_expect("echo $?", exit_ok);

    ctx.run_logged_in(&record, GuestOsKind::Alpine, &[&script])
        .await
        .context("virtio drivers were not found on the cdrom")?;
}
