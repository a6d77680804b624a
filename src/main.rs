// SPDX-License-Identifier: MIT

fn main() {
    mimewire::run();
}
